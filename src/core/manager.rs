use async_trait::async_trait;
use crate::Result;
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};

/// The symbol query surface shared by the core manager, every decorator and
/// the remote client.
///
/// Fact accessors return `Ok(None)` when the distribution ships no data of
/// that kind for the symbol; errors are reserved for failed lookups.
#[async_trait]
pub trait Manager: Send + Sync {
    /// All manifest distributions, sorted
    async fn distributions(&self) -> Result<Vec<Distribution>>;

    /// Whether the distribution's resource group is currently in memory
    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool>;

    /// All indexed top-level package names, sorted
    async fn packages(&self) -> Result<Vec<String>>;

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>>;

    /// One canonicalized symbol per distribution exposing the path's head
    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>>;

    /// First result of [`Manager::resolve_path`]
    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol>;

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol>;

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol>;

    async fn kind(&self, symbol: &Symbol) -> Result<Kind>;

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol>;

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>>;

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>>;

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>>;

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>>;

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>>;

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>>;

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>>;

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>>;

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>>;

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>>;

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>>;

    /// Fraction of observed calls passing exactly `num_args` arguments
    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>>;

    /// Fraction of observed calls passing at most `num_args` arguments
    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>>;

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>>;

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>>;

    /// Drop every loaded resource group; later queries load again
    async fn reset(&self) -> Result<()>;

    /// Release all resources. Calling it twice is harmless.
    async fn close(&self) -> Result<()>;
}
