use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use crate::Result;
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::manager::Manager;
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::layers::{sym_arg, sym_arg_with};

/// Emits one trace event per call, with its outcome and duration
pub struct LoggingManager {
    inner: Arc<dyn Manager>,
}

impl LoggingManager {
    pub fn new(inner: Arc<dyn Manager>) -> Self {
        Self { inner }
    }

    async fn traced<T, Fut>(&self, method: &'static str, args: String, call: Fut) -> Result<T>
    where
        T: Debug,
        Fut: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        let result = call.await;
        match &result {
            Ok(value) => debug!(method, args = %args, elapsed = ?started.elapsed(), result = ?value, "manager call"),
            Err(e) => debug!(method, args = %args, elapsed = ?started.elapsed(), error = %e, "manager call failed"),
        }
        result
    }
}

#[async_trait]
impl Manager for LoggingManager {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        self.traced("distributions", String::new(), self.inner.distributions()).await
    }

    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool> {
        self.traced("distribution_loaded", dist.to_string(), self.inner.distribution_loaded(dist))
            .await
    }

    async fn packages(&self) -> Result<Vec<String>> {
        self.traced("packages", String::new(), self.inner.packages()).await
    }

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>> {
        self.traced(
            "distributions_for_package",
            name.to_string(),
            self.inner.distributions_for_package(name),
        )
        .await
    }

    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>> {
        self.traced("resolve_path", path.to_string(), self.inner.resolve_path(path)).await
    }

    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol> {
        self.traced("resolve_symbol", path.to_string(), self.inner.resolve_symbol(path)).await
    }

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol> {
        self.traced(
            "new_symbol",
            format!("{}_{}", dist, path),
            self.inner.new_symbol(dist, path),
        )
        .await
    }

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol> {
        self.traced(
            "child_symbol",
            sym_arg_with(symbol, name),
            self.inner.child_symbol(symbol, name),
        )
        .await
    }

    async fn kind(&self, symbol: &Symbol) -> Result<Kind> {
        self.traced("kind", sym_arg(symbol), self.inner.kind(symbol)).await
    }

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol> {
        self.traced("symbol_type", sym_arg(symbol), self.inner.symbol_type(symbol)).await
    }

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.traced("bases", sym_arg(symbol), self.inner.bases(symbol)).await
    }

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>> {
        self.traced("children", sym_arg(symbol), self.inner.children(symbol)).await
    }

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>> {
        self.traced("canonical_symbols", dist.to_string(), self.inner.canonical_symbols(dist))
            .await
    }

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>> {
        self.traced("top_levels", dist.to_string(), self.inner.top_levels(dist)).await
    }

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>> {
        self.traced("documentation", sym_arg(symbol), self.inner.documentation(symbol)).await
    }

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.traced("symbol_counts", sym_arg(symbol), self.inner.symbol_counts(symbol)).await
    }

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.traced("arg_spec", sym_arg(symbol), self.inner.arg_spec(symbol)).await
    }

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.traced("signatures", sym_arg(symbol), self.inner.signatures(symbol)).await
    }

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>> {
        self.traced("sig_stats", sym_arg(symbol), self.inner.sig_stats(symbol)).await
    }

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.traced("kwargs", sym_arg(symbol), self.inner.kwargs(symbol)).await
    }

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>> {
        self.traced(
            "keyword_arg_frequency",
            sym_arg_with(symbol, arg),
            self.inner.keyword_arg_frequency(symbol, arg),
        )
        .await
    }

    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.traced(
            "num_args_frequency",
            sym_arg_with(symbol, num_args),
            self.inner.num_args_frequency(symbol, num_args),
        )
        .await
    }

    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.traced(
            "cumulative_num_args_frequency",
            sym_arg_with(symbol, num_args),
            self.inner.cumulative_num_args_frequency(symbol, num_args),
        )
        .await
    }

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.traced("return_types", sym_arg(symbol), self.inner.return_types(symbol)).await
    }

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        self.traced(
            "truthy_return_types",
            sym_arg(symbol),
            self.inner.truthy_return_types(symbol),
        )
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.traced("reset", String::new(), self.inner.reset()).await
    }

    async fn close(&self) -> Result<()> {
        self.traced("close", String::new(), self.inner.close()).await
    }
}
