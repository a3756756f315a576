//! Decorators wrapping any [`Manager`](crate::Manager) with memoization,
//! call tracing or call statistics. Each forwards to the wrapped manager and
//! passes its results and errors through unchanged.

pub mod caching;
pub mod logging;
pub mod stats;

use crate::core::symbol::Symbol;

/// Argument string for a single-symbol call
pub(crate) fn sym_arg(symbol: &Symbol) -> String {
    symbol.to_string()
}

/// Argument string for a symbol plus one extra argument
pub(crate) fn sym_arg_with(symbol: &Symbol, extra: impl std::fmt::Display) -> String {
    format!("{}_{}", symbol, extra)
}
