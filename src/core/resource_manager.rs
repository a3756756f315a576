use crate::{Result, ResourceError, constants::MIN_TICK_INTERVAL};
use crate::core::cache::{DistributionCache, DynamicDistribution, LoadSource};
use crate::core::config::Options;
use crate::core::distidx::DistributionIndex;
use crate::core::interner::Interner;
use crate::core::keytypes::Distribution;
use crate::core::manifest::Manifest;
use crate::core::resources::ResourceGroup;
use crate::core::toplevel::ToplevelEntities;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fires once when the initial bulk load has finished
pub struct Readiness {
    rx: oneshot::Receiver<Result<()>>,
}

impl Readiness {
    /// Wait for the bulk load; yields the first load error, if any.
    /// The manager stays usable for everything that did load.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(ResourceError::Closed))
    }
}

/// A live distribution, as reported by [`ResourceManager::loaded_distributions`]
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDistribution {
    pub dist: Distribution,
    pub loaded_at: DateTime<Utc>,
    pub source: LoadSource,
}

/// The core manager: loads resource groups on demand, evicts them after
/// disuse and answers symbol queries against them.
///
/// Construction spawns background tasks and therefore needs a Tokio runtime.
pub struct ResourceManager {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) manifest: Manifest,
    pub(crate) index: DistributionIndex,
    pub(crate) toplevel: parking_lot::RwLock<Option<Arc<ToplevelEntities>>>,
    pub(crate) max_depth: usize,
    cache: DistributionCache,
    interner: Interner,
    load_locks: parking_lot::Mutex<FxHashMap<Distribution, Arc<Mutex<()>>>>,
    loads: AtomicU64,
    load_attempts: usize,
    load_backoff: Duration,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ResourceManager {
    /// Build a manager and start loading its initial distributions in the
    /// background. Queries may be issued right away.
    pub fn new(opts: Options) -> (Self, Readiness) {
        let Options {
            mut manifest,
            index,
            distributions,
            toplevel_data_path,
            concurrency_limit,
            cache_capacity,
            disable_dynamic_loading,
            load_attempts,
            load_backoff,
            unload_interval,
            unload_timeout,
            max_recursion_depth,
        } = opts;

        let eager = distributions.unwrap_or_else(|| manifest.distributions());
        if disable_dynamic_loading {
            manifest = manifest.filter_distributions(&eager);
        }
        let capacity = if cache_capacity == 0 {
            manifest.len()
        } else {
            cache_capacity
        };

        let inner = Arc::new(Inner {
            manifest,
            index,
            toplevel: parking_lot::RwLock::new(None),
            max_depth: max_recursion_depth,
            cache: DistributionCache::new(capacity.max(1)),
            interner: Interner::new(),
            load_locks: parking_lot::Mutex::new(FxHashMap::default()),
            loads: AtomicU64::new(0),
            load_attempts: load_attempts.max(1),
            load_backoff,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let unload_interval = unload_interval.max(MIN_TICK_INTERVAL);
        tokio::spawn(unloader(inner.clone(), unload_interval, unload_timeout));

        let (tx, rx) = oneshot::channel();
        let startup = inner.clone();
        tokio::spawn(async move {
            let result = load_initial(
                startup,
                eager,
                concurrency_limit.max(1),
                toplevel_data_path,
            )
            .await;
            // nobody waiting is fine
            let _ = tx.send(result);
        });

        (Self { inner }, Readiness { rx })
    }

    /// Load attempts made so far, successful or not
    pub fn load_count(&self) -> u64 {
        self.inner.loads.load(Ordering::Relaxed)
    }

    pub async fn loaded_distributions(&self) -> Vec<LoadedDistribution> {
        let mut loaded: Vec<LoadedDistribution> = self
            .inner
            .cache
            .loaded()
            .await
            .into_iter()
            .map(|(dist, entry)| LoadedDistribution {
                dist,
                loaded_at: entry.loaded_wall,
                source: entry.source,
            })
            .collect();
        loaded.sort_by(|a, b| a.dist.cmp(&b.dist));
        loaded
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.inner.cache.hit_rate()
    }

    /// Number of distinct path components currently interned
    pub fn interned_len(&self) -> usize {
        self.inner.interner.len()
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn load_lock(&self, dist: &Distribution) -> Arc<Mutex<()>> {
        self.load_locks
            .lock()
            .entry(dist.clone())
            .or_default()
            .clone()
    }

    /// Fetch a distribution's resource group, loading it if needed.
    ///
    /// Concurrent callers for the same distribution share one load; failures
    /// are retried with growing backoff and never cached.
    pub(crate) async fn load_group(
        &self,
        dist: &Distribution,
        source: LoadSource,
    ) -> Result<Arc<ResourceGroup>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ResourceError::Closed);
        }
        if dist.is_nil() {
            return Err(ResourceError::DistributionUnloadable {
                dist: dist.clone(),
                reason: "empty distribution".to_string(),
            });
        }
        if let Some(group) = self.cache.get(dist).await {
            return Ok(group);
        }

        let loader = self.manifest.loader(dist).ok_or_else(|| ResourceError::DistributionUnloadable {
            dist: dist.clone(),
            reason: "not in manifest".to_string(),
        })?;

        let lock = self.load_lock(dist);
        let _guard = lock.lock().await;
        // someone else may have finished the load while we waited
        if let Some(group) = self.cache.get(dist).await {
            return Ok(group);
        }

        let started = Instant::now();
        let mut last_err = None;
        for attempt in 0..self.load_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.load_backoff * attempt as u32).await;
            }
            self.loads.fetch_add(1, Ordering::Relaxed);
            debug!(dist = %dist, attempt = attempt + 1, "loading distribution");

            match loader.load(dist).await {
                Ok(mut group) => {
                    group.intern(&self.interner);
                    let group = Arc::new(group);
                    let entry = DynamicDistribution::new(group.clone(), source);
                    if let Some((evicted, _)) = self.cache.insert(dist.clone(), entry).await {
                        info!(dist = %evicted, "evicted least recently used distribution");
                    }
                    info!(
                        dist = %dist,
                        source = %source,
                        elapsed = ?started.elapsed(),
                        "loaded distribution"
                    );
                    return Ok(group);
                }
                Err(e) => {
                    warn!(
                        dist = %dist,
                        attempt = attempt + 1,
                        attempts = self.load_attempts,
                        error = %e,
                        "error loading distribution"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(ResourceError::DistributionUnloadable {
            dist: dist.clone(),
            reason: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    pub(crate) async fn is_loaded(&self, dist: &Distribution) -> bool {
        self.cache.contains(dist).await
    }

    pub(crate) async fn reset(&self) {
        // interned strings go first so no cached group outlives its table
        self.interner.clear();
        self.cache.clear().await;
        info!("reset resource manager");
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.cache.clear().await;
        info!("closed resource manager");
    }
}

async fn load_initial(
    inner: Arc<Inner>,
    dists: Vec<Distribution>,
    concurrency: usize,
    toplevel_path: Option<String>,
) -> Result<()> {
    let started = Instant::now();
    let count = dists.len();
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let mut tasks: Vec<_> = dists
        .into_iter()
        .map(|dist| {
            let sem = Arc::clone(&semaphore);
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|_| ResourceError::Closed)?;
                inner.load_group(&dist, LoadSource::Eager).await.map(|_| ())
            })
        })
        .collect();

    if let Some(path) = toplevel_path {
        let inner = Arc::clone(&inner);
        tasks.push(tokio::spawn(async move {
            let entities = ToplevelEntities::load(&path).await?;
            debug!(entries = entities.len(), "loaded toplevel data");
            *inner.toplevel.write() = Some(Arc::new(entities));
            Ok::<(), ResourceError>(())
        }));
    }

    let results = futures::future::join_all(tasks).await;
    let mut first_err = None;
    for result in results {
        let result =
            result.unwrap_or_else(|e| Err(ResourceError::Io(std::io::Error::other(e.to_string()))));
        if let Err(e) = result {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => {
            warn!(error = %e, "initial load incomplete");
            Err(e)
        }
        None => {
            info!(distributions = count, elapsed = ?started.elapsed(), "initial load complete");
            Ok(())
        }
    }
}

async fn unloader(inner: Arc<Inner>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = ticker.tick() => {
                for (dist, idle) in inner.cache.sweep(timeout).await {
                    info!(dist = %dist, idle = ?idle, "unloaded distribution");
                }
            }
        }
    }
}
