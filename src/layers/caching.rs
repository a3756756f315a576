use async_trait::async_trait;
use bloomfilter::Bloom;
use lru::LruCache;
use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use crate::{Result, constants::{CALL_CACHE_ENTRIES, CALL_CACHE_TTL}};
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::manager::Manager;
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::layers::{sym_arg, sym_arg_with};

type CachedValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: CachedValue,
    expires: Instant,
}

/// Bounded, expiring memo table with probabilistic admission.
///
/// While there is room every result is admitted. Once full, a key is only
/// admitted (evicting the least recently used entry) if the doorkeeper has
/// seen it before, so one-off calls cannot flush frequently repeated ones.
struct CallCache {
    entries: parking_lot::Mutex<LruCache<String, Entry>>,
    doorkeeper: parking_lot::Mutex<Bloom<String>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CallCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: parking_lot::Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            doorkeeper: parking_lot::Mutex::new(Bloom::new_for_fp_rate(capacity * 4, 0.01)),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &str) -> Option<CachedValue> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let found = match entries.get(key) {
            Some(entry) if entry.expires > now => Some(entry.value.clone()),
            _ => None,
        };
        if found.is_none() {
            // drops the expired entry, if any
            entries.pop(key);
        }
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    fn insert(&self, key: String, value: CachedValue) {
        let mut entries = self.entries.lock();
        let admit = entries.len() < self.capacity
            || entries.contains(&key)
            || self.doorkeeper.lock().check_and_set(&key);
        if admit {
            let expires = Instant::now() + self.ttl;
            entries.put(key, Entry { value, expires });
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
        self.doorkeeper.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Memoizes successful calls of the wrapped manager for a fixed time.
///
/// Errors are never cached. A memoized value may disappear before its TTL
/// under admission pressure. `distribution_loaded` always reaches the wrapped
/// manager, since it reports live state.
pub struct CachingManager {
    inner: Arc<dyn Manager>,
    cache: CallCache,
}

impl CachingManager {
    pub fn new(inner: Arc<dyn Manager>) -> Self {
        Self::with_capacity(inner, CALL_CACHE_ENTRIES, CALL_CACHE_TTL)
    }

    pub fn with_capacity(inner: Arc<dyn Manager>, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: CallCache::new(capacity, ttl),
        }
    }

    /// Number of memoized results currently held
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache.hits.load(Ordering::Relaxed);
        let total = hits + self.cache.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    async fn caching<T, F, Fut>(&self, method: &str, args: Option<String>, call: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let key = match args {
            Some(args) => format!("{}_{}", method, args),
            None => method.to_string(),
        };
        if let Some(value) = self.cache.get(&key) {
            if let Some(value) = value.downcast_ref::<T>() {
                return Ok(value.clone());
            }
        }

        let value = call().await?;
        debug!(key = %key, "memoizing call");
        self.cache.insert(key, Arc::new(value.clone()));
        Ok(value)
    }
}

#[async_trait]
impl Manager for CachingManager {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        self.caching("distributions", None, || self.inner.distributions()).await
    }

    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool> {
        self.inner.distribution_loaded(dist).await
    }

    async fn packages(&self) -> Result<Vec<String>> {
        self.caching("packages", None, || self.inner.packages()).await
    }

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>> {
        self.caching("distributions_for_package", Some(name.to_string()), || {
            self.inner.distributions_for_package(name)
        })
        .await
    }

    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>> {
        self.caching("resolve_path", Some(path.to_string()), || self.inner.resolve_path(path))
            .await
    }

    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol> {
        self.caching("resolve_symbol", Some(path.to_string()), || self.inner.resolve_symbol(path))
            .await
    }

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol> {
        self.caching("new_symbol", Some(format!("{}_{}", dist, path)), || {
            self.inner.new_symbol(dist, path)
        })
        .await
    }

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol> {
        self.caching("child_symbol", Some(sym_arg_with(symbol, name)), || {
            self.inner.child_symbol(symbol, name)
        })
        .await
    }

    async fn kind(&self, symbol: &Symbol) -> Result<Kind> {
        self.caching("kind", Some(sym_arg(symbol)), || self.inner.kind(symbol)).await
    }

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol> {
        self.caching("symbol_type", Some(sym_arg(symbol)), || self.inner.symbol_type(symbol))
            .await
    }

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.caching("bases", Some(sym_arg(symbol)), || self.inner.bases(symbol)).await
    }

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>> {
        self.caching("children", Some(sym_arg(symbol)), || self.inner.children(symbol)).await
    }

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>> {
        self.caching("canonical_symbols", Some(dist.to_string()), || {
            self.inner.canonical_symbols(dist)
        })
        .await
    }

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>> {
        self.caching("top_levels", Some(dist.to_string()), || self.inner.top_levels(dist))
            .await
    }

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>> {
        self.caching("documentation", Some(sym_arg(symbol)), || {
            self.inner.documentation(symbol)
        })
        .await
    }

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.caching("symbol_counts", Some(sym_arg(symbol)), || {
            self.inner.symbol_counts(symbol)
        })
        .await
    }

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.caching("arg_spec", Some(sym_arg(symbol)), || self.inner.arg_spec(symbol)).await
    }

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.caching("signatures", Some(sym_arg(symbol)), || self.inner.signatures(symbol))
            .await
    }

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>> {
        self.caching("sig_stats", Some(sym_arg(symbol)), || self.inner.sig_stats(symbol)).await
    }

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.caching("kwargs", Some(sym_arg(symbol)), || self.inner.kwargs(symbol)).await
    }

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>> {
        self.caching("keyword_arg_frequency", Some(sym_arg_with(symbol, arg)), || {
            self.inner.keyword_arg_frequency(symbol, arg)
        })
        .await
    }

    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.caching("num_args_frequency", Some(sym_arg_with(symbol, num_args)), || {
            self.inner.num_args_frequency(symbol, num_args)
        })
        .await
    }

    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.caching(
            "cumulative_num_args_frequency",
            Some(sym_arg_with(symbol, num_args)),
            || self.inner.cumulative_num_args_frequency(symbol, num_args),
        )
        .await
    }

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.caching("return_types", Some(sym_arg(symbol)), || self.inner.return_types(symbol))
            .await
    }

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        self.caching("truthy_return_types", Some(sym_arg(symbol)), || {
            self.inner.truthy_return_types(symbol)
        })
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.cache.clear();
        self.inner.reset().await
    }

    async fn close(&self) -> Result<()> {
        self.cache.clear();
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_needs_a_second_sighting_once_full() {
        let cache = CallCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), Arc::new(1u32));
        cache.insert("b".into(), Arc::new(2u32));

        // first sighting of c is refused, the second evicts the LRU entry
        cache.insert("c".into(), Arc::new(3u32));
        assert!(cache.get("c").is_none());
        cache.insert("c".into(), Arc::new(3u32));
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = CallCache::new(4, Duration::from_secs(60));
        cache.insert("a".into(), Arc::new(1u32));
        assert!(cache.get("a").is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }
}
