//! Symbol canonicalization and the query surface of the core manager.
//!
//! `resolve_path_at` and `canonicalize_at` are mutually recursive: a path
//! that leaves its distribution through an external reference is resolved
//! again from its new head. Both carry an explicit depth and fail once it
//! reaches the configured bound.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use crate::{Result, ResourceError};
use crate::core::cache::LoadSource;
use crate::core::keytypes::{Distribution, Kind, Path, SymbolKey};
use crate::core::manager::Manager;
use crate::core::resource_manager::{Inner, ResourceManager};
use crate::core::resources::{
    fact, ArgSpec, Documentation, KeywordArgs, ResourceGroup, SigStats, Signature, SymbolCounts,
    Truthiness,
};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::core::symgraph::{GraphError, Ref};
use crate::core::toplevel::Entity;

impl Inner {
    pub(crate) fn resolve_path_at<'a>(
        &'a self,
        path: &'a Path,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<Symbol>>> {
        async move {
            if depth >= self.max_depth {
                return Err(ResourceError::RecursionLimitExceeded(self.max_depth));
            }

            let dists = self.index.distributions_for(path.head());
            if dists.is_empty() {
                return Err(ResourceError::NoDistributionsMatch(path.clone()));
            }

            let mut symbols = Vec::with_capacity(dists.len());
            let mut last_err = None;
            for dist in dists {
                let key = SymbolKey::new(dist.clone(), path.clone());
                match self.canonicalize_at(key, depth).await {
                    Ok(sym) => symbols.push(sym),
                    Err(e) if e.is_recursion_limit() => return Err(e),
                    Err(e) => last_err = Some(e),
                }
            }

            match last_err {
                Some(cause) if symbols.is_empty() => Err(ResourceError::PathNotFound {
                    path: path.clone(),
                    cause: Box::new(cause),
                }),
                _ => Ok(symbols),
            }
        }
        .boxed()
    }

    pub(crate) fn canonicalize_at(&self, key: SymbolKey, depth: usize) -> BoxFuture<'_, Result<Symbol>> {
        async move {
            if depth >= self.max_depth {
                return Err(ResourceError::RecursionLimitExceeded(self.max_depth));
            }
            if !self.manifest.contains(&key.dist) {
                return Err(ResourceError::DistributionUnloadable {
                    dist: key.dist.clone(),
                    reason: "not in manifest".to_string(),
                });
            }

            let toplevel = key.path.head().to_string();
            if !self.index.exposes(&toplevel, &key.dist) {
                return Err(ResourceError::TopLevelNotFound(toplevel));
            }

            // the index already vouches for the top level itself
            if key.path.len() == 1 {
                return Ok(Symbol::canonical_at(key, Ref::toplevel(&toplevel)));
            }

            let group = self.load_group(&key.dist, LoadSource::Dynamic).await?;
            let graph = &group.symbol_graph;
            match graph.lookup(&key.path) {
                Ok(reference) => {
                    let canonical = SymbolKey::new(key.dist.clone(), graph.canonical(&reference)?);
                    Ok(Symbol::new(key, canonical, reference))
                }
                Err(GraphError::External(ext)) => {
                    let target = ext.with_rest();
                    let resolved = self.resolve_path_at(&target, depth + 1).await?;
                    first(resolved, &target).map(|sym| sym.requeried(key))
                }
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    /// The canonical distribution's group for a symbol
    async fn group_of(&self, symbol: &Symbol) -> Result<Arc<ResourceGroup>> {
        self.load_group(&symbol.canonical_key().dist, LoadSource::Dynamic).await
    }

    fn toplevel_entity(&self, symbol: &Symbol) -> Option<Entity> {
        if symbol.path().len() != 1 {
            return None;
        }
        let entities = self.toplevel.read().clone()?;
        entities.get(symbol.dist(), symbol.path_head()).cloned()
    }

    /// Look up a fact keyed by the symbol's canonical path
    async fn with_fact<T>(
        &self,
        symbol: &Symbol,
        lookup: impl FnOnce(&ResourceGroup, &str) -> Option<T> + Send,
    ) -> Result<Option<T>> {
        let group = self.group_of(symbol).await?;
        let path = symbol.canonical_key().path.to_string();
        Ok(lookup(&group, &path))
    }

    async fn resolve_type_paths(&self, symbol: &Symbol) -> Result<Vec<(Symbol, Truthiness)>> {
        let types = self
            .with_fact(symbol, |g, p| fact(&g.return_types, p).cloned())
            .await?
            .unwrap_or_default();

        let mut resolved = Vec::with_capacity(types.len());
        for (type_path, truthiness) in types {
            // return types may name symbols that are not in the corpus
            if let Ok(sym) = self.resolve_symbol_at(&Path::new(&type_path)).await {
                resolved.push((sym, truthiness));
            }
        }
        resolved.sort();
        Ok(resolved)
    }

    async fn resolve_symbol_at(&self, path: &Path) -> Result<Symbol> {
        let symbols = self.resolve_path_at(path, 0).await?;
        first(symbols, path)
    }
}

fn first(symbols: Vec<Symbol>, path: &Path) -> Result<Symbol> {
    symbols
        .into_iter()
        .next()
        .ok_or_else(|| ResourceError::NoDistributionsMatch(path.clone()))
}

#[async_trait]
impl Manager for ResourceManager {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        Ok(self.inner.manifest.distributions())
    }

    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool> {
        Ok(self.inner.is_loaded(dist).await)
    }

    async fn packages(&self) -> Result<Vec<String>> {
        Ok(self.inner.index.packages())
    }

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>> {
        Ok(self.inner.index.distributions_for(name).to_vec())
    }

    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>> {
        self.inner.resolve_path_at(path, 0).await
    }

    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol> {
        self.inner.resolve_symbol_at(path).await
    }

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol> {
        let key = SymbolKey::new(dist.clone(), path.clone());
        self.inner.canonicalize_at(key, 0).await
    }

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol> {
        let group = self.inner.group_of(symbol).await?;
        let graph = &group.symbol_graph;
        let child = SymbolKey::new(symbol.dist().clone(), symbol.path().with_tail(name));

        match graph.child(symbol.reference(), name) {
            Ok(reference) => {
                let canonical = SymbolKey::new(
                    symbol.canonical_key().dist.clone(),
                    graph.canonical(&reference)?,
                );
                Ok(Symbol::new(child, canonical, reference))
            }
            Err(GraphError::External(ext)) => {
                let resolved = self.inner.resolve_symbol_at(&ext.with_rest()).await?;
                Ok(resolved.requeried(child))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn kind(&self, symbol: &Symbol) -> Result<Kind> {
        if self.inner.toplevel_entity(symbol).is_some() {
            return Ok(Kind::Module);
        }
        let group = self.inner.group_of(symbol).await?;
        Ok(group.symbol_graph.kind(symbol.reference())?)
    }

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol> {
        if self.inner.toplevel_entity(symbol).is_some() {
            return Err(ResourceError::NoType(symbol.path_string()));
        }
        let group = self.inner.group_of(symbol).await?;
        let graph = &group.symbol_graph;

        match graph.type_of(symbol.reference()) {
            Ok(reference) => {
                let key = SymbolKey::new(
                    symbol.canonical_key().dist.clone(),
                    graph.canonical(&reference)?,
                );
                Ok(Symbol::canonical_at(key, reference))
            }
            Err(GraphError::External(ext)) => self.inner.resolve_symbol_at(&ext.with_rest()).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        if self.inner.toplevel_entity(symbol).is_some() {
            return Ok(Vec::new());
        }
        let group = self.inner.group_of(symbol).await?;
        let graph = &group.symbol_graph;
        let dist = &symbol.canonical_key().dist;

        let mut bases = Vec::new();
        for i in 0..graph.num_bases(symbol.reference())? {
            match graph.base(symbol.reference(), i) {
                Ok(reference) => {
                    let Ok(path) = graph.canonical(&reference) else {
                        continue;
                    };
                    bases.push(Symbol::canonical_at(SymbolKey::new(dist.clone(), path), reference));
                }
                Err(GraphError::External(ext)) => {
                    if let Ok(base) = self.inner.resolve_symbol_at(&ext.with_rest()).await {
                        bases.push(base);
                    }
                }
                Err(_) => continue,
            }
        }
        Ok(bases)
    }

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>> {
        let group = self.inner.group_of(symbol).await?;
        Ok(group.symbol_graph.children(symbol.reference())?)
    }

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>> {
        let group = self.inner.load_group(dist, LoadSource::Dynamic).await?;
        Ok(group
            .symbol_graph
            .nodes()
            .map(|(reference, node)| {
                Symbol::canonical_at(SymbolKey::new(dist.clone(), node.canonical.clone()), reference)
            })
            .collect())
    }

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>> {
        let group = self.inner.load_group(dist, LoadSource::Dynamic).await?;
        Ok(group.symbol_graph.toplevels().map(str::to_string).collect())
    }

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>> {
        let docs = self
            .inner
            .with_fact(symbol, |g, p| fact(&g.documentation, p).cloned())
            .await?;
        if docs.is_some() {
            return Ok(docs);
        }
        Ok(self.inner.toplevel_entity(symbol).and_then(|e| e.documentation))
    }

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.inner
            .with_fact(symbol, |g, p| fact(&g.symbol_counts, p).cloned())
            .await
    }

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.inner
            .with_fact(symbol, |g, p| fact(&g.arg_specs, p).cloned())
            .await
    }

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.inner
            .with_fact(symbol, |g, p| fact(&g.signatures, p).cloned())
            .await
    }

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>> {
        self.inner
            .with_fact(symbol, |g, p| fact(&g.sig_stats, p).cloned())
            .await
    }

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.inner
            .with_fact(symbol, |g, p| fact(&g.kwargs, p).cloned())
            .await
    }

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>> {
        self.inner
            .with_fact(symbol, |g, p| {
                fact(&g.sig_stats, p).and_then(|s| s.keyword_frequency(arg))
            })
            .await
    }

    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.inner
            .with_fact(symbol, |g, p| {
                fact(&g.sig_stats, p).and_then(|s| s.num_args_frequency(num_args))
            })
            .await
    }

    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.inner
            .with_fact(symbol, |g, p| {
                fact(&g.sig_stats, p).and_then(|s| s.cumulative_num_args_frequency(num_args))
            })
            .await
    }

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        let resolved = self.inner.resolve_type_paths(symbol).await?;
        Ok(resolved.into_iter().map(|(sym, _)| sym).collect())
    }

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        let resolved = self.inner.resolve_type_paths(symbol).await?;
        Ok(resolved
            .into_iter()
            .map(|(symbol, truthiness)| TruthySymbol { symbol, truthiness })
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await;
        Ok(())
    }
}
