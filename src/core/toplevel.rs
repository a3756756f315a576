//! Supplementary per-package summaries, keyed by distribution and top-level name.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use crate::Result;
use crate::core::keytypes::Distribution;
use crate::core::resources::Documentation;
use crate::utils::fs::read_resource;

/// Summary of one top-level package as shipped in the top-level data file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
}

#[derive(Debug, Deserialize)]
struct Record {
    distribution: Distribution,
    toplevel: String,
    #[serde(default)]
    documentation: Option<Documentation>,
}

#[derive(Debug, Clone, Default)]
pub struct ToplevelEntities {
    entities: FxHashMap<(Distribution, String), Entity>,
}

impl ToplevelEntities {
    pub async fn load(uri: &str) -> Result<Self> {
        let records: Vec<Record> = read_resource(uri).await?;
        let mut entities = Self::default();
        for record in records {
            entities.insert(
                record.distribution,
                record.toplevel,
                Entity {
                    documentation: record.documentation,
                },
            );
        }
        Ok(entities)
    }

    pub fn insert(&mut self, dist: Distribution, toplevel: impl Into<String>, entity: Entity) {
        self.entities.insert((dist, toplevel.into()), entity);
    }

    pub fn get(&self, dist: &Distribution, toplevel: &str) -> Option<&Entity> {
        // tuple keys can't be borrowed piecewise
        self.entities.get(&(dist.clone(), toplevel.to_string()))
    }

    pub fn contains(&self, dist: &Distribution, toplevel: &str) -> bool {
        self.get(dist, toplevel).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
