//! Pyresource - on-demand resource manager for Python package metadata
//!
//! Serves symbol graphs, documentation, signatures, return types and usage
//! counts for a large corpus of versioned Python distributions:
//! - Lazy, deduplicated loading of per-distribution resource groups
//! - LRU + idle-timeout eviction of loaded groups
//! - Cross-distribution symbol canonicalization
//! - Caching, logging and statistics layers over a single `Manager` trait
//! - A remote client/server exposing the same trait over TCP

// Use mimalloc for better memory performance
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod cli;
pub mod core;
pub mod layers;
pub mod remote;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::{Options, ResourceConfig},
    distidx::DistributionIndex,
    keytypes::{Distribution, Kind, Path, SymbolKey},
    manager::Manager,
    manifest::Manifest,
    resource_manager::{Readiness, ResourceManager},
    symbol::Symbol,
};

pub use layers::{caching::CachingManager, logging::LoggingManager, stats::StatsManager};

pub use remote::{client::RpcClient, server::RpcServer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("toplevel {0} not found")]
    TopLevelNotFound(String),

    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("no distributions match path {0}")]
    NoDistributionsMatch(Path),

    #[error("no distributions match path {path}: {cause}")]
    PathNotFound {
        path: Path,
        cause: Box<ResourceError>,
    },

    #[error("could not load resource group for distribution {dist}: {reason}")]
    DistributionUnloadable { dist: Distribution, reason: String },

    #[error("recursion depth limit ({0}) exceeded")]
    RecursionLimitExceeded(usize),

    #[error("no type for {0}")]
    NoType(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Remote "no value" marker; translated to `None` by the client and never
    /// returned to callers.
    #[error("remote call returned no value")]
    RemoteSentinel,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("manager is closed")]
    Closed,
}

impl ResourceError {
    /// Whether this error (or any error it wraps) hit the canonicalization depth bound.
    pub fn is_recursion_limit(&self) -> bool {
        match self {
            ResourceError::RecursionLimitExceeded(_) => true,
            ResourceError::PathNotFound { cause, .. } => cause.is_recursion_limit(),
            _ => false,
        }
    }

    /// The innermost cause of a `PathNotFound` chain.
    pub fn root_cause(&self) -> &ResourceError {
        match self {
            ResourceError::PathNotFound { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Global constants for performance tuning
pub mod constants {
    use std::time::Duration;

    pub const DEFAULT_CONCURRENCY: usize = 32;
    pub const DEFAULT_LOAD_ATTEMPTS: usize = 3;
    pub const DEFAULT_LOAD_BACKOFF: Duration = Duration::from_secs(5);
    pub const MAX_RECURSION_DEPTH: usize = 10;
    pub const UNLOAD_CHECK_INTERVAL: Duration = Duration::from_secs(60);
    pub const UNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    pub const CALL_CACHE_ENTRIES: usize = 10_000;
    pub const CALL_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
    pub const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);
    /// Shortest period accepted by background tickers
    pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
    pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:9777";
    pub const MMAP_THRESHOLD: u64 = 1 << 20;
}
