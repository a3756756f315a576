//! Distribution index: importable top-level name -> distributions providing it.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use crate::Result;
use crate::core::keytypes::Distribution;
use crate::utils::fs::read_resource;

#[derive(Debug, Clone, Default)]
pub struct DistributionIndex {
    packages: FxHashMap<String, Vec<Distribution>>,
}

impl DistributionIndex {
    pub fn new(packages: impl IntoIterator<Item = (String, Vec<Distribution>)>) -> Self {
        let packages = packages
            .into_iter()
            .map(|(pkg, mut dists)| {
                dists.sort();
                dists.dedup();
                (pkg, dists)
            })
            .collect();
        Self { packages }
    }

    /// Load a serialized index (`{"toplevel": ["name==version", ...]}`)
    pub async fn load(uri: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<Distribution>> = read_resource(uri).await?;
        Ok(Self::new(raw))
    }

    /// All indexed top-level packages, sorted
    pub fn packages(&self) -> Vec<String> {
        let mut pkgs: Vec<String> = self.packages.keys().cloned().collect();
        pkgs.sort();
        pkgs
    }

    /// Distributions exposing `pkg`, in distribution order
    pub fn distributions_for(&self, pkg: &str) -> &[Distribution] {
        self.packages.get(pkg).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exposes(&self, pkg: &str, dist: &Distribution) -> bool {
        self.distributions_for(pkg).contains(dist)
    }

    pub fn insert(&mut self, pkg: impl Into<String>, dist: Distribution) {
        let dists = self.packages.entry(pkg.into()).or_default();
        if !dists.contains(&dist) {
            dists.push(dist);
            dists.sort();
        }
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributions_are_ordered() {
        let mut index = DistributionIndex::default();
        index.insert("six", Distribution::new("six", "1.12.0"));
        index.insert("six", Distribution::builtin("2.7"));
        index.insert("six", Distribution::new("six", "1.12.0"));

        assert_eq!(
            index.distributions_for("six"),
            &[Distribution::builtin("2.7"), Distribution::new("six", "1.12.0")]
        );
        assert!(index.exposes("six", &Distribution::builtin("2.7")));
        assert!(!index.exposes("yaml", &Distribution::builtin("2.7")));
        assert!(index.distributions_for("yaml").is_empty());
    }

    #[tokio::test]
    async fn loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("distidx.json");
        std::fs::write(
            &path,
            r#"{"json": ["builtin-stdlib==3.7"], "requests": ["requests==2.22.0"]}"#,
        )
        .unwrap();

        let index = DistributionIndex::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(index.packages(), vec!["json", "requests"]);
        assert_eq!(index.distributions_for("json"), &[Distribution::builtin("3.7")]);
    }
}
