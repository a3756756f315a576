//! In-memory fixtures for exercising managers without on-disk data.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use crate::{Result, ResourceError};
use crate::core::config::Options;
use crate::core::distidx::DistributionIndex;
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::manager::Manager;
use crate::core::manifest::{GroupLoader, Manifest};
use crate::core::resources::{
    ArgSpec, Documentation, FactTable, KeywordArgs, ResourceGroup, SigStats, Signature,
    SymbolCounts, Truthiness,
};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::core::symgraph::{Graph, Node, Target};

/// A loader serving a fixed resource group, counting its attempts
#[derive(Debug)]
pub struct StaticLoader {
    group: ResourceGroup,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
}

impl StaticLoader {
    pub fn new(group: ResourceGroup) -> Self {
        Self {
            group,
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Fail the next `n` attempts
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every attempt
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupLoader for StaticLoader {
    async fn load(&self, dist: &Distribution) -> Result<ResourceGroup> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ResourceError::Io(std::io::Error::other(format!(
                "injected failure loading {}",
                dist
            ))));
        }
        Ok(self.group.clone())
    }

    fn symbol_only(&self) -> Arc<dyn GroupLoader> {
        let group = ResourceGroup::new(self.group.symbol_graph.clone());
        Arc::new(StaticLoader::new(group).with_delay(self.delay))
    }
}

#[derive(Debug, Default)]
struct MockDistribution {
    toplevels: BTreeMap<String, Vec<Node>>,
    /// dotted path -> node index under its top level
    nodes: BTreeMap<String, usize>,
    group: ResourceGroup,
}

impl MockDistribution {
    /// Index of `path` under its top level, creating missing nodes as modules
    fn ensure(&mut self, path: &str) -> (usize, &mut Node) {
        let parts: Vec<&str> = path.split('.').collect();
        let toplevel = parts[0];
        let nodes = self
            .toplevels
            .entry(toplevel.to_string())
            .or_insert_with(|| vec![Node::new(Path::new(toplevel), Kind::Module)]);
        self.nodes.entry(toplevel.to_string()).or_insert(0);

        let mut current = 0;
        for i in 1..parts.len() {
            let prefix = parts[..=i].join(".");
            current = match self.nodes.get(&prefix) {
                Some(idx) => *idx,
                None => {
                    let idx = nodes.len();
                    nodes.push(Node::new(Path::new(&prefix), Kind::Module));
                    nodes[current]
                        .children
                        .insert(parts[i].to_string(), Target::Internal(idx));
                    self.nodes.insert(prefix, idx);
                    idx
                }
            };
        }
        (current, &mut nodes[current])
    }

    fn node_mut(&mut self, path: &str) -> &mut Node {
        self.ensure(path).1
    }

    fn split_parent(path: &str) -> (&str, &str) {
        path.rsplit_once('.')
            .unwrap_or_else(|| panic!("{} needs a parent to hang an edge on", path))
    }

    fn target(&mut self, path: &str, to: &str) -> Target {
        let same_toplevel = path.split('.').next() == to.split('.').next();
        if same_toplevel {
            Target::Internal(self.ensure(to).0)
        } else {
            Target::External(Path::new(to))
        }
    }

    fn build(&self) -> ResourceGroup {
        let mut group = self.group.clone();
        group.symbol_graph = Graph::new(self.toplevels.clone());
        group
    }
}

fn table<T>(slot: &mut Option<FactTable<T>>) -> &mut FactTable<T> {
    slot.get_or_insert_with(FactTable::default)
}

/// Builder for small synthetic datasets.
///
/// Intermediate path components are created as modules on demand. Edges
/// between paths under the same top level become internal references; all
/// others become external references, possibly into other distributions.
#[derive(Debug, Default)]
pub struct MockDataset {
    dists: BTreeMap<Distribution, MockDistribution>,
}

impl MockDataset {
    pub fn new() -> Self {
        Self::default()
    }

    fn dist(&mut self, dist: &Distribution) -> &mut MockDistribution {
        self.dists.entry(dist.clone()).or_default()
    }

    /// Define `path` (and its parents) with the given kind
    pub fn add(&mut self, dist: &Distribution, path: &str, kind: Kind) -> &mut Self {
        self.dist(dist).node_mut(path).kind = kind;
        self
    }

    /// Make `path` refer to `target`, which may live anywhere
    pub fn alias(&mut self, dist: &Distribution, path: &str, target: &str) -> &mut Self {
        let d = self.dist(dist);
        let (parent, name) = MockDistribution::split_parent(path);
        let edge = d.target(path, target);
        d.node_mut(parent).children.insert(name.to_string(), edge);
        self
    }

    pub fn base(&mut self, dist: &Distribution, path: &str, base: &str) -> &mut Self {
        let d = self.dist(dist);
        let edge = d.target(path, base);
        d.node_mut(path).bases.push(edge);
        self
    }

    pub fn type_of(&mut self, dist: &Distribution, path: &str, ty: &str) -> &mut Self {
        let d = self.dist(dist);
        let edge = d.target(path, ty);
        d.node_mut(path).type_of = Some(edge);
        self
    }

    pub fn docs(&mut self, dist: &Distribution, path: &str, text: &str) -> &mut Self {
        let doc = Documentation {
            text: text.to_string(),
            html: String::new(),
        };
        table(&mut self.dist(dist).group.documentation).insert(path.to_string(), doc);
        self
    }

    pub fn return_type(
        &mut self,
        dist: &Distribution,
        path: &str,
        ty: &str,
        truthiness: Truthiness,
    ) -> &mut Self {
        table(&mut self.dist(dist).group.return_types)
            .entry(path.to_string())
            .or_default()
            .insert(ty.to_string(), truthiness);
        self
    }

    pub fn counts(&mut self, dist: &Distribution, path: &str, counts: SymbolCounts) -> &mut Self {
        table(&mut self.dist(dist).group.symbol_counts).insert(path.to_string(), counts);
        self
    }

    pub fn arg_spec(&mut self, dist: &Distribution, path: &str, spec: ArgSpec) -> &mut Self {
        table(&mut self.dist(dist).group.arg_specs).insert(path.to_string(), spec);
        self
    }

    pub fn signatures(&mut self, dist: &Distribution, path: &str, sigs: Vec<Signature>) -> &mut Self {
        table(&mut self.dist(dist).group.signatures).insert(path.to_string(), sigs);
        self
    }

    pub fn sig_stats(&mut self, dist: &Distribution, path: &str, stats: SigStats) -> &mut Self {
        table(&mut self.dist(dist).group.sig_stats).insert(path.to_string(), stats);
        self
    }

    pub fn kwargs(&mut self, dist: &Distribution, path: &str, kwargs: KeywordArgs) -> &mut Self {
        table(&mut self.dist(dist).group.kwargs).insert(path.to_string(), kwargs);
        self
    }

    /// Every top level defined in a distribution is indexed under it
    pub fn index(&self) -> DistributionIndex {
        let mut index = DistributionIndex::default();
        for (dist, mock) in &self.dists {
            for toplevel in mock.toplevels.keys() {
                index.insert(toplevel.clone(), dist.clone());
            }
        }
        index
    }

    /// The resource group a distribution's loader would serve
    pub fn group(&self, dist: &Distribution) -> Option<ResourceGroup> {
        self.dists.get(dist).map(MockDistribution::build)
    }

    pub fn loaders(&self) -> BTreeMap<Distribution, Arc<StaticLoader>> {
        self.dists
            .iter()
            .map(|(dist, mock)| (dist.clone(), Arc::new(StaticLoader::new(mock.build()))))
            .collect()
    }

    /// Options for a manager over this dataset, with its loaders.
    ///
    /// Nothing is loaded eagerly and retries do not back off, so tests see
    /// every load they trigger.
    pub fn options(&self) -> (Options, BTreeMap<Distribution, Arc<StaticLoader>>) {
        let loaders = self.loaders();
        let mut manifest = Manifest::new();
        for (dist, loader) in &loaders {
            manifest.insert(dist.clone(), loader.clone());
        }
        let mut opts = Options::new(manifest, self.index());
        opts.distributions = Some(Vec::new());
        opts.load_backoff = Duration::ZERO;
        (opts, loaders)
    }
}

/// A manager whose every method fails
#[derive(Debug, Default)]
pub struct ErrorManager {
    calls: AtomicUsize,
}

impl ErrorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self, method: &str) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ResourceError::Rpc(format!("{} failed", method)))
    }
}

#[async_trait]
impl Manager for ErrorManager {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        self.fail("distributions")
    }

    async fn distribution_loaded(&self, _dist: &Distribution) -> Result<bool> {
        self.fail("distribution_loaded")
    }

    async fn packages(&self) -> Result<Vec<String>> {
        self.fail("packages")
    }

    async fn distributions_for_package(&self, _name: &str) -> Result<Vec<Distribution>> {
        self.fail("distributions_for_package")
    }

    async fn resolve_path(&self, _path: &Path) -> Result<Vec<Symbol>> {
        self.fail("resolve_path")
    }

    async fn resolve_symbol(&self, _path: &Path) -> Result<Symbol> {
        self.fail("resolve_symbol")
    }

    async fn new_symbol(&self, _dist: &Distribution, _path: &Path) -> Result<Symbol> {
        self.fail("new_symbol")
    }

    async fn child_symbol(&self, _symbol: &Symbol, _name: &str) -> Result<Symbol> {
        self.fail("child_symbol")
    }

    async fn kind(&self, _symbol: &Symbol) -> Result<Kind> {
        self.fail("kind")
    }

    async fn symbol_type(&self, _symbol: &Symbol) -> Result<Symbol> {
        self.fail("symbol_type")
    }

    async fn bases(&self, _symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.fail("bases")
    }

    async fn children(&self, _symbol: &Symbol) -> Result<Vec<String>> {
        self.fail("children")
    }

    async fn canonical_symbols(&self, _dist: &Distribution) -> Result<Vec<Symbol>> {
        self.fail("canonical_symbols")
    }

    async fn top_levels(&self, _dist: &Distribution) -> Result<Vec<String>> {
        self.fail("top_levels")
    }

    async fn documentation(&self, _symbol: &Symbol) -> Result<Option<Documentation>> {
        self.fail("documentation")
    }

    async fn symbol_counts(&self, _symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.fail("symbol_counts")
    }

    async fn arg_spec(&self, _symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.fail("arg_spec")
    }

    async fn signatures(&self, _symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.fail("signatures")
    }

    async fn sig_stats(&self, _symbol: &Symbol) -> Result<Option<SigStats>> {
        self.fail("sig_stats")
    }

    async fn kwargs(&self, _symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.fail("kwargs")
    }

    async fn keyword_arg_frequency(&self, _symbol: &Symbol, _arg: &str) -> Result<Option<u64>> {
        self.fail("keyword_arg_frequency")
    }

    async fn num_args_frequency(&self, _symbol: &Symbol, _num_args: usize) -> Result<Option<f64>> {
        self.fail("num_args_frequency")
    }

    async fn cumulative_num_args_frequency(&self, _symbol: &Symbol, _num_args: usize) -> Result<Option<f64>> {
        self.fail("cumulative_num_args_frequency")
    }

    async fn return_types(&self, _symbol: &Symbol) -> Result<Vec<Symbol>> {
        self.fail("return_types")
    }

    async fn truthy_return_types(&self, _symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        self.fail("truthy_return_types")
    }

    async fn reset(&self) -> Result<()> {
        self.fail("reset")
    }

    async fn close(&self) -> Result<()> {
        self.fail("close")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symgraph::GraphError;

    #[test]
    fn builds_graph_with_internal_and_external_edges() {
        let dist = Distribution::new("pkg", "1");
        let mut data = MockDataset::new();
        data.add(&dist, "pkg.sub.Cls", Kind::Type)
            .alias(&dist, "pkg.Cls", "pkg.sub.Cls")
            .alias(&dist, "pkg.json", "json")
            .base(&dist, "pkg.sub.Cls", "builtins.object");

        let group = data.dists[&dist].build();
        let graph = &group.symbol_graph;
        let cls = graph.lookup(&Path::new("pkg.Cls")).unwrap();
        assert_eq!(graph.canonical(&cls).unwrap(), Path::new("pkg.sub.Cls"));
        assert_eq!(graph.kind(&cls).unwrap(), Kind::Type);
        assert!(matches!(graph.base(&cls, 0), Err(GraphError::External(_))));
        assert!(matches!(
            graph.lookup(&Path::new("pkg.json.dumps")),
            Err(GraphError::External(_))
        ));
        assert_eq!(data.index().distributions_for("pkg"), &[dist]);
    }

    #[tokio::test]
    async fn static_loader_injects_failures() {
        let loader = StaticLoader::new(ResourceGroup::default()).failing(1);
        let dist = Distribution::new("pkg", "1");
        assert!(loader.load(&dist).await.is_err());
        assert!(loader.load(&dist).await.is_ok());
        assert_eq!(loader.attempts(), 2);
    }
}
