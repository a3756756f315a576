use crate::{Result, ResourceError, constants::*};
use crate::core::distidx::DistributionIndex;
use crate::core::keytypes::Distribution;
use crate::core::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Compiled-in location of the default manifest
pub const DEFAULT_MANIFEST_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/manifest.json");

/// Compiled-in location of the default distribution index
pub const DEFAULT_DISTIDX_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/distidx.json");

/// Construction options for the core manager
#[derive(Debug, Clone)]
pub struct Options {
    pub manifest: Manifest,
    pub index: DistributionIndex,
    /// Distributions loaded eagerly at startup; all manifest entries when `None`
    pub distributions: Option<Vec<Distribution>>,
    pub toplevel_data_path: Option<String>,
    pub concurrency_limit: usize,
    /// 0 means the size of the manifest
    pub cache_capacity: usize,
    pub disable_dynamic_loading: bool,
    pub load_attempts: usize,
    pub load_backoff: Duration,
    pub unload_interval: Duration,
    pub unload_timeout: Duration,
    pub max_recursion_depth: usize,
}

impl Options {
    pub fn new(manifest: Manifest, index: DistributionIndex) -> Self {
        Self {
            manifest,
            index,
            distributions: None,
            toplevel_data_path: None,
            concurrency_limit: DEFAULT_CONCURRENCY,
            cache_capacity: 0,
            disable_dynamic_loading: false,
            load_attempts: DEFAULT_LOAD_ATTEMPTS,
            load_backoff: DEFAULT_LOAD_BACKOFF,
            unload_interval: UNLOAD_CHECK_INTERVAL,
            unload_timeout: UNLOAD_TIMEOUT,
            max_recursion_depth: MAX_RECURSION_DEPTH,
        }
    }

    /// Options over the compiled-in dataset
    pub async fn load_default() -> Result<Self> {
        Self::with_custom_paths(DEFAULT_MANIFEST_PATH, DEFAULT_DISTIDX_PATH).await
    }

    pub async fn with_custom_paths(manifest: &str, index: &str) -> Result<Self> {
        let (manifest, index) =
            tokio::try_join!(Manifest::load(manifest), DistributionIndex::load(index))?;
        Ok(Self::new(manifest, index))
    }

    /// Restrict every manifest entry to its symbol graph
    pub fn symbol_only(mut self) -> Self {
        self.manifest = self.manifest.symbol_only();
        self
    }
}

/// On-disk configuration (`pyresource.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_distidx")]
    pub distidx: String,
    #[serde(default, rename = "toplevel-data", skip_serializing_if = "Option::is_none")]
    pub toplevel_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributions: Option<Vec<String>>,
    #[serde(default, rename = "symbol-only")]
    pub symbol_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadingConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default, rename = "cache-capacity")]
    pub cache_capacity: usize,
    #[serde(default, rename = "disable-dynamic-loading")]
    pub disable_dynamic_loading: bool,
    #[serde(default = "default_load_attempts", rename = "load-attempts")]
    pub load_attempts: usize,
    #[serde(default = "default_load_backoff", rename = "load-backoff-secs")]
    pub load_backoff_secs: u64,
    #[serde(default = "default_unload_interval", rename = "unload-interval-secs")]
    pub unload_interval_secs: u64,
    #[serde(default = "default_unload_timeout", rename = "unload-timeout-secs")]
    pub unload_timeout_secs: u64,
    #[serde(default = "default_recursion_depth", rename = "max-recursion-depth")]
    pub max_recursion_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub stats: bool,
    #[serde(default)]
    pub cache: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            distidx: default_distidx(),
            toplevel_data: None,
            distributions: None,
            symbol_only: false,
        }
    }
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            cache_capacity: 0,
            disable_dynamic_loading: false,
            load_attempts: default_load_attempts(),
            load_backoff_secs: default_load_backoff(),
            unload_interval_secs: default_unload_interval(),
            unload_timeout_secs: default_unload_timeout(),
            max_recursion_depth: default_recursion_depth(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            stats: false,
            cache: false,
        }
    }
}

fn default_manifest() -> String {
    DEFAULT_MANIFEST_PATH.to_string()
}

fn default_distidx() -> String {
    DEFAULT_DISTIDX_PATH.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_load_attempts() -> usize {
    DEFAULT_LOAD_ATTEMPTS
}

fn default_load_backoff() -> u64 {
    DEFAULT_LOAD_BACKOFF.as_secs()
}

fn default_unload_interval() -> u64 {
    UNLOAD_CHECK_INTERVAL.as_secs()
}

fn default_unload_timeout() -> u64 {
    UNLOAD_TIMEOUT.as_secs()
}

fn default_recursion_depth() -> usize {
    MAX_RECURSION_DEPTH
}

fn default_addr() -> String {
    DEFAULT_RPC_ADDR.to_string()
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            loading: LoadingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ResourceConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).await?;
        let config: ResourceConfig = toml::from_str(&contents)
            .map_err(|e| ResourceError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ResourceError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents).await?;
        Ok(())
    }

    /// Load the configured manifest and index and build manager options
    pub async fn into_options(self) -> Result<Options> {
        let mut opts = Options::with_custom_paths(&self.data.manifest, &self.data.distidx).await?;
        if self.data.symbol_only {
            opts = opts.symbol_only();
        }
        opts.distributions = self
            .data
            .distributions
            .map(|dists| dists.iter().map(|d| d.parse()).collect::<Result<Vec<Distribution>>>())
            .transpose()?;
        opts.toplevel_data_path = self.data.toplevel_data;

        let loading = self.loading;
        opts.concurrency_limit = loading.concurrency.max(1);
        opts.cache_capacity = loading.cache_capacity;
        opts.disable_dynamic_loading = loading.disable_dynamic_loading;
        opts.load_attempts = loading.load_attempts.max(1);
        opts.load_backoff = Duration::from_secs(loading.load_backoff_secs);
        opts.unload_interval = Duration::from_secs(loading.unload_interval_secs.max(1));
        opts.unload_timeout = Duration::from_secs(loading.unload_timeout_secs);
        opts.max_recursion_depth = loading.max_recursion_depth;
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_takes_defaults() {
        let config: ResourceConfig = toml::from_str(
            r#"
            [loading]
            load-attempts = 5

            [server]
            addr = "0.0.0.0:9000"
            stats = true
            "#,
        )
        .unwrap();

        assert_eq!(config.loading.load_attempts, 5);
        assert_eq!(config.loading.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.loading.unload_timeout_secs, 30 * 60);
        assert_eq!(config.server.addr, "0.0.0.0:9000");
        assert!(config.server.stats);
        assert!(!config.server.cache);
        assert_eq!(config.data.manifest, DEFAULT_MANIFEST_PATH);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyresource.toml");
        let mut config = ResourceConfig::default();
        config.data.distributions = Some(vec!["builtin-stdlib==3.7".into()]);
        config.save(&path).await.unwrap();

        assert_eq!(ResourceConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn into_options_rejects_bad_distribution() {
        let mut config = ResourceConfig::default();
        config.data.distributions = Some(vec!["no-version".into()]);
        assert!(matches!(
            config.into_options().await,
            Err(ResourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn default_options_cover_bundled_data() {
        let opts = Options::load_default().await.unwrap();
        assert!(opts.manifest.contains(&Distribution::builtin("3.7")));
        assert_eq!(opts.max_recursion_depth, MAX_RECURSION_DEPTH);
        assert!(!opts.index.distributions_for("json").is_empty());
    }
}
