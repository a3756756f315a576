//! Subcommands of the `pyresource` binary

pub mod dists;
pub mod query;
pub mod serve;

use std::path::Path;
use std::sync::Arc;
use colored::Colorize;
use crate::{Result, ResourceConfig, ResourceManager};
use crate::core::manager::Manager;
use crate::utils::progress::ProgressTracker;

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pyresource.toml";

/// Load the configuration: an explicit file, `./pyresource.toml`, or defaults
pub async fn load_config(path: Option<&Path>) -> Result<ResourceConfig> {
    match path {
        Some(path) => ResourceConfig::load(path).await,
        None => {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            if local.exists() {
                ResourceConfig::load(local).await
            } else {
                Ok(ResourceConfig::default())
            }
        }
    }
}

/// Build the core manager and wait for its initial load behind a spinner.
///
/// A failed initial load is reported but not fatal; whatever did load is
/// still served.
pub(crate) async fn start_manager(config: ResourceConfig, lazy: bool) -> Result<ResourceManager> {
    let mut opts = config.into_options().await?;
    if lazy {
        opts.distributions.get_or_insert_with(Vec::new);
    }
    let eager = opts
        .distributions
        .as_ref()
        .map(|d| d.len())
        .unwrap_or_else(|| opts.manifest.len());

    let (manager, ready) = ResourceManager::new(opts);
    let progress = ProgressTracker::new();
    let spinner = progress
        .add_spinner(&format!("Loading {} distributions...", eager))
        .await;
    let result = ready.wait().await;
    spinner.finish_and_clear();
    progress.finish_all().await;

    if let Err(e) = result {
        eprintln!("{} initial load incomplete: {}", "!".yellow().bold(), e);
    }
    Ok(manager)
}

/// Close a manager stack, reporting rather than failing on errors
pub(crate) async fn shutdown(manager: Arc<dyn Manager>) {
    if let Err(e) = manager.close().await {
        eprintln!("{} close failed: {}", "!".yellow().bold(), e);
    }
}
