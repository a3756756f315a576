use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use crate::{Result, constants::MIN_TICK_INTERVAL};
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::manager::Manager;
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::layers::{sym_arg, sym_arg_with};

/// Arguments seen at least this often are listed individually in reports
const ARG_REPORT_THRESHOLD: u64 = 10;

#[derive(Debug, Default, Clone)]
struct MethodStats {
    count: u64,
    total: Duration,
    args: FxHashMap<String, u64>,
}

impl MethodStats {
    fn duplicate_calls(&self) -> u64 {
        self.args.values().filter(|c| **c >= 2).map(|c| c - 1).sum()
    }
}

#[derive(Debug, Default)]
struct CallStats {
    methods: parking_lot::Mutex<FxHashMap<&'static str, MethodStats>>,
    reports: AtomicU64,
}

impl CallStats {
    fn record(&self, method: &'static str, arg: String, elapsed: Duration) {
        let mut methods = self.methods.lock();
        let stats = methods.entry(method).or_default();
        stats.count += 1;
        stats.total += elapsed;
        *stats.args.entry(arg).or_default() += 1;
    }

    fn render(&self) -> String {
        let mut all: Vec<(&'static str, MethodStats)> = self
            .methods
            .lock()
            .iter()
            .map(|(name, stats)| (*name, stats.clone()))
            .collect();
        all.sort_by(|a, b| b.1.total.cmp(&a.1.total).then(a.0.cmp(b.0)));

        let mut out = String::new();
        let _ = writeln!(out, "{:<32} {:>10} {:>12} {:>10}", "method", "calls", "total s", "ms/call");
        for (name, stats) in &all {
            let per_call = stats.total.as_secs_f64() * 1000.0 / stats.count.max(1) as f64;
            let _ = writeln!(
                out,
                "{:<32} {:>10} {:>12.3} {:>10.3}",
                name,
                stats.count,
                stats.total.as_secs_f64(),
                per_call
            );
        }

        for (name, stats) in &all {
            let duplicates = stats.duplicate_calls();
            let _ = writeln!(
                out,
                "\n{}: duplicate calls: {} of {}, {:.2}% of total number of calls",
                name,
                duplicates,
                stats.count,
                percent(duplicates, stats.count)
            );

            let mut args: Vec<(&String, &u64)> = stats
                .args
                .iter()
                .filter(|(_, count)| **count > ARG_REPORT_THRESHOLD)
                .collect();
            args.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (arg, count) in args {
                let _ = writeln!(
                    out,
                    "  {}: {:<40} {:>8} {:>8.2}%",
                    name,
                    arg,
                    count,
                    percent(*count, stats.count)
                );
            }
        }
        out
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Records per-method call counts, durations and argument repetition.
///
/// Results and errors of the wrapped manager pass through untouched.
pub struct StatsManager {
    inner: Arc<dyn Manager>,
    stats: Arc<CallStats>,
    log_calls: bool,
    shutdown: CancellationToken,
}

impl StatsManager {
    pub fn new(inner: Arc<dyn Manager>) -> Self {
        Self {
            inner,
            stats: Arc::new(CallStats::default()),
            log_calls: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Also log every call at INFO level
    pub fn log_calls(mut self, enabled: bool) -> Self {
        self.log_calls = enabled;
        self
    }

    /// Periodically log a report until the manager is closed or dropped
    pub fn with_reporter(self, interval: Duration) -> Self {
        let interval = interval.max(MIN_TICK_INTERVAL);
        let stats = Arc::clone(&self.stats);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        stats.reports.fetch_add(1, Ordering::Relaxed);
                        info!("manager call statistics\n{}", stats.render());
                    }
                }
            }
        });
        self
    }

    /// Calls recorded so far for one method
    pub fn call_count(&self, method: &str) -> u64 {
        self.stats
            .methods
            .lock()
            .get(method)
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// Reports logged by the background reporter
    pub fn report_count(&self) -> u64 {
        self.stats.reports.load(Ordering::Relaxed)
    }

    pub fn render_report(&self) -> String {
        self.stats.render()
    }

    async fn timed<T, Fut>(&self, method: &'static str, arg: String, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
    {
        if self.log_calls {
            info!(method, arg = %arg, "manager call");
        }
        let started = Instant::now();
        let result = call.await;
        self.stats.record(method, arg, started.elapsed());
        result
    }
}

impl Drop for StatsManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Manager for StatsManager {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        self.timed("distributions", String::new(), self.inner.distributions()).await
    }

    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool> {
        self.timed("distribution_loaded", dist.to_string(), self.inner.distribution_loaded(dist))
            .await
    }

    async fn packages(&self) -> Result<Vec<String>> {
        self.timed("packages", String::new(), self.inner.packages()).await
    }

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>> {
        self.timed(
            "distributions_for_package",
            name.to_string(),
            self.inner.distributions_for_package(name),
        )
        .await
    }

    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>> {
        self.timed("resolve_path", path.to_string(), self.inner.resolve_path(path)).await
    }

    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol> {
        self.timed("resolve_symbol", path.to_string(), self.inner.resolve_symbol(path)).await
    }

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol> {
        self.timed(
            "new_symbol",
            format!("{}_{}", dist, path),
            self.inner.new_symbol(dist, path),
        )
        .await
    }

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol> {
        self.timed(
            "child_symbol",
            sym_arg_with(symbol, name),
            self.inner.child_symbol(symbol, name),
        )
        .await
    }

    async fn kind(&self, symbol: &Symbol) -> Result<Kind> {
        self.timed("kind", sym_arg(symbol), self.inner.kind(symbol)).await
    }

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol> {
        self.timed("symbol_type", sym_arg(symbol), self.inner.symbol_type(symbol)).await
    }

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.timed("bases", sym_arg(symbol), self.inner.bases(symbol)).await
    }

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>> {
        self.timed("children", sym_arg(symbol), self.inner.children(symbol)).await
    }

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>> {
        self.timed("canonical_symbols", dist.to_string(), self.inner.canonical_symbols(dist))
            .await
    }

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>> {
        self.timed("top_levels", dist.to_string(), self.inner.top_levels(dist)).await
    }

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>> {
        self.timed("documentation", sym_arg(symbol), self.inner.documentation(symbol)).await
    }

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.timed("symbol_counts", sym_arg(symbol), self.inner.symbol_counts(symbol)).await
    }

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.timed("arg_spec", sym_arg(symbol), self.inner.arg_spec(symbol)).await
    }

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.timed("signatures", sym_arg(symbol), self.inner.signatures(symbol)).await
    }

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>> {
        self.timed("sig_stats", sym_arg(symbol), self.inner.sig_stats(symbol)).await
    }

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.timed("kwargs", sym_arg(symbol), self.inner.kwargs(symbol)).await
    }

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>> {
        self.timed(
            "keyword_arg_frequency",
            sym_arg_with(symbol, arg),
            self.inner.keyword_arg_frequency(symbol, arg),
        )
        .await
    }

    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.timed(
            "num_args_frequency",
            sym_arg_with(symbol, num_args),
            self.inner.num_args_frequency(symbol, num_args),
        )
        .await
    }

    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.timed(
            "cumulative_num_args_frequency",
            sym_arg_with(symbol, num_args),
            self.inner.cumulative_num_args_frequency(symbol, num_args),
        )
        .await
    }

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.timed("return_types", sym_arg(symbol), self.inner.return_types(symbol)).await
    }

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        self.timed(
            "truthy_return_types",
            sym_arg(symbol),
            self.inner.truthy_return_types(symbol),
        )
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.timed("reset", String::new(), self.inner.reset()).await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_ranks_by_total_duration() {
        let stats = CallStats::default();
        for _ in 0..12 {
            stats.record("kind", "json.dumps".into(), Duration::from_millis(1));
        }
        stats.record("documentation", "json.loads".into(), Duration::from_millis(50));

        let report = stats.render();
        let kind = report.find("kind").unwrap();
        let docs = report.find("documentation").unwrap();
        assert!(docs < kind);
        assert!(report.contains("kind: duplicate calls: 11 of 12"));
        assert!(report.contains("kind: json.dumps"));
        assert!(!report.contains("documentation: json.loads"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_reporter_interval_keeps_reporting() {
        let stats = StatsManager::new(Arc::new(crate::core::testing::ErrorManager::new()))
            .with_reporter(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(stats.report_count() > 0);

        stats.close().await.unwrap_err();
        let reports = stats.report_count();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(stats.report_count(), reports);
    }
}
