//! Manifest: distribution -> loader able to produce its resource group.

use async_trait::async_trait;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use crate::{Result, ResourceError};
use crate::core::keytypes::Distribution;
use crate::core::resources::{ResourceGroup, ResourceKind};
use crate::core::symgraph::Graph;
use crate::utils::fs::{decode_file, localize, locator_dir, read_resource, resolve_locator};

/// Produces a distribution's resource group from durable storage
#[async_trait]
pub trait GroupLoader: Send + Sync + fmt::Debug {
    async fn load(&self, dist: &Distribution) -> Result<ResourceGroup>;

    /// A loader that only produces the symbol graph
    fn symbol_only(&self) -> Arc<dyn GroupLoader>;
}

/// Locations of every resource file of one distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorGroup {
    locators: BTreeMap<ResourceKind, String>,
}

impl LocatorGroup {
    pub fn new(locators: BTreeMap<ResourceKind, String>) -> Self {
        Self { locators }
    }

    pub fn locator(&self, kind: ResourceKind) -> Option<&str> {
        self.locators.get(&kind).map(String::as_str)
    }

    fn resolved(self, base: Option<&str>) -> Self {
        Self {
            locators: self
                .locators
                .into_iter()
                .map(|(kind, loc)| (kind, resolve_locator(base, &loc)))
                .collect(),
        }
    }
}

enum Decoded {
    Graph(Graph),
    Group(Box<dyn FnOnce(&mut ResourceGroup) + Send>),
}

fn decode_kind(kind: ResourceKind, path: &PathBuf) -> Result<Decoded> {
    let decoded = match kind {
        ResourceKind::SymbolGraph => Decoded::Graph(decode_file(path)?),
        ResourceKind::Documentation => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.documentation = Some(table)))
        }
        ResourceKind::SymbolCounts => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.symbol_counts = Some(table)))
        }
        ResourceKind::ArgSpecs => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.arg_specs = Some(table)))
        }
        ResourceKind::Signatures => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.signatures = Some(table)))
        }
        ResourceKind::SigStats => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.sig_stats = Some(table)))
        }
        ResourceKind::Kwargs => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.kwargs = Some(table)))
        }
        ResourceKind::ReturnTypes => {
            let table = decode_file(path)?;
            Decoded::Group(Box::new(move |g| g.return_types = Some(table)))
        }
    };
    Ok(decoded)
}

#[async_trait]
impl GroupLoader for LocatorGroup {
    async fn load(&self, dist: &Distribution) -> Result<ResourceGroup> {
        if self.locator(ResourceKind::SymbolGraph).is_none() {
            return Err(ResourceError::Config(format!(
                "manifest entry for {} has no symbol graph",
                dist
            )));
        }

        // Fetch remote files first, then decode everything in parallel
        let fetches = self.locators.iter().map(|(kind, loc)| async move {
            localize(loc).await.map(|path| (*kind, path))
        });
        let files: Vec<(ResourceKind, PathBuf)> = futures::future::try_join_all(fetches).await?;

        debug!(dist = %dist, files = files.len(), "decoding resource group");
        let decoded = tokio::task::spawn_blocking(move || {
            files
                .par_iter()
                .map(|(kind, path)| decode_kind(*kind, path))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| ResourceError::Io(std::io::Error::other(e.to_string())))??;

        let mut group = ResourceGroup::default();
        for item in decoded {
            match item {
                Decoded::Graph(graph) => group.symbol_graph = graph,
                Decoded::Group(apply) => apply(&mut group),
            }
        }
        Ok(group)
    }

    fn symbol_only(&self) -> Arc<dyn GroupLoader> {
        let locators = self
            .locators
            .iter()
            .filter(|(kind, _)| **kind == ResourceKind::SymbolGraph)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Arc::new(LocatorGroup::new(locators))
    }
}

/// Static mapping from distribution to loader, fixed for the process lifetime
#[derive(Clone, Default)]
pub struct Manifest {
    entries: BTreeMap<Distribution, Arc<dyn GroupLoader>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a serialized manifest; relative locators resolve against its location
    pub async fn load(uri: &str) -> Result<Self> {
        let raw: BTreeMap<Distribution, LocatorGroup> = read_resource(uri).await?;
        let base = locator_dir(uri);
        Ok(Self::from_locators(raw, base.as_deref()))
    }

    pub fn from_locators(raw: BTreeMap<Distribution, LocatorGroup>, base: Option<&str>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(dist, group)| {
                let loader: Arc<dyn GroupLoader> = Arc::new(group.resolved(base));
                (dist, loader)
            })
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, dist: Distribution, loader: Arc<dyn GroupLoader>) {
        self.entries.insert(dist, loader);
    }

    /// All distributions, in distribution order
    pub fn distributions(&self) -> Vec<Distribution> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, dist: &Distribution) -> bool {
        self.entries.contains_key(dist)
    }

    pub fn loader(&self, dist: &Distribution) -> Option<Arc<dyn GroupLoader>> {
        self.entries.get(dist).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The same manifest restricted to symbol graphs
    pub fn symbol_only(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(dist, loader)| (dist.clone(), loader.symbol_only()))
                .collect(),
        }
    }

    /// The same manifest restricted to the given distributions
    pub fn filter_distributions(&self, dists: &[Distribution]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(dist, _)| dists.contains(dist))
                .map(|(dist, loader)| (dist.clone(), loader.clone()))
                .collect(),
        }
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
