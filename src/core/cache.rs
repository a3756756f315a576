use crate::core::keytypes::Distribution;
use crate::core::resources::ResourceGroup;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Where a cache entry's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Bulk load at startup
    Eager,
    /// First query against an unloaded distribution
    Dynamic,
}

impl std::fmt::Display for LoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSource::Eager => f.write_str("eager"),
            LoadSource::Dynamic => f.write_str("dynamic"),
        }
    }
}

/// A loaded distribution
#[derive(Debug, Clone)]
pub struct DynamicDistribution {
    pub group: Arc<ResourceGroup>,
    pub source: LoadSource,
    pub loaded_at: Instant,
    pub used_at: Instant,
    pub loaded_wall: DateTime<Utc>,
}

impl DynamicDistribution {
    pub fn new(group: Arc<ResourceGroup>, source: LoadSource) -> Self {
        let now = Instant::now();
        Self {
            group,
            source,
            loaded_at: now,
            used_at: now,
            loaded_wall: Utc::now(),
        }
    }
}

/// Bounded LRU of loaded resource groups with idle-time eviction
#[derive(Clone)]
pub struct DistributionCache {
    entries: Arc<RwLock<LruCache<Distribution, DynamicDistribution>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl DistributionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fetch a loaded group, refreshing its last-used time
    pub async fn get(&self, dist: &Distribution) -> Option<Arc<ResourceGroup>> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(dist) {
            Some(entry) => {
                entry.used_at = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.group.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Presence check that touches neither recency nor counters
    pub async fn contains(&self, dist: &Distribution) -> bool {
        self.entries.read().await.contains(dist)
    }

    pub async fn peek(&self, dist: &Distribution) -> Option<DynamicDistribution> {
        self.entries.read().await.peek(dist).cloned()
    }

    /// Insert an entry, returning whatever capacity pressure pushed out
    pub async fn insert(
        &self,
        dist: Distribution,
        entry: DynamicDistribution,
    ) -> Option<(Distribution, DynamicDistribution)> {
        let mut entries = self.entries.write().await;
        match entries.push(dist, entry) {
            // push hands back the old value when replacing the same key
            Some((evicted, old)) if !entries.contains(&evicted) => Some((evicted, old)),
            _ => None,
        }
    }

    /// Drop every entry idle for longer than `timeout`
    pub async fn sweep(&self, timeout: Duration) -> Vec<(Distribution, Duration)> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<(Distribution, Duration)> = entries
            .iter()
            .map(|(dist, entry)| (dist, now.saturating_duration_since(entry.used_at)))
            .filter(|(_, idle)| *idle > timeout)
            .map(|(dist, idle)| (dist.clone(), idle))
            .collect();
        for (dist, _) in &expired {
            entries.pop(dist);
        }
        expired
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of live entries, most recently used first
    pub async fn loaded(&self) -> Vec<(Distribution, DynamicDistribution)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(dist, entry)| (dist.clone(), entry.clone()))
            .collect()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> DynamicDistribution {
        DynamicDistribution::new(Arc::new(ResourceGroup::default()), LoadSource::Dynamic)
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = DistributionCache::new(2);
        let a = Distribution::new("a", "1");
        let b = Distribution::new("b", "1");
        let c = Distribution::new("c", "1");

        assert!(cache.insert(a.clone(), entry()).await.is_none());
        assert!(cache.insert(b.clone(), entry()).await.is_none());
        assert!(cache.get(&a).await.is_some());

        let (evicted, _) = cache.insert(c.clone(), entry()).await.unwrap();
        assert_eq!(evicted, b);
        assert!(cache.contains(&a).await);
        assert!(!cache.contains(&b).await);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn replacing_an_entry_is_not_an_eviction() {
        let cache = DistributionCache::new(2);
        let a = Distribution::new("a", "1");
        cache.insert(a.clone(), entry()).await;
        assert!(cache.insert(a.clone(), entry()).await.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_idle_entries() {
        let cache = DistributionCache::new(4);
        let idle = Distribution::new("idle", "1");
        let busy = Distribution::new("busy", "1");
        cache.insert(idle.clone(), entry()).await;
        cache.insert(busy.clone(), entry()).await;

        tokio::time::advance(Duration::from_secs(90)).await;
        cache.get(&busy).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let swept = cache.sweep(Duration::from_secs(60)).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, idle);
        assert!(cache.contains(&busy).await);
        assert!(!cache.contains(&idle).await);
    }

    #[tokio::test]
    async fn hit_rate_counts_lookups() {
        let cache = DistributionCache::new(1);
        let a = Distribution::new("a", "1");
        assert_eq!(cache.hit_rate(), 0.0);
        cache.get(&a).await;
        cache.insert(a.clone(), entry()).await;
        cache.get(&a).await;
        assert_eq!(cache.hit_rate(), 0.5);
    }
}
