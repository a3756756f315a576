//! Per-distribution symbol graph: a forest of top-level modules whose nodes
//! link to each other by index, or leave the distribution through external
//! references.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::ResourceError;
use crate::core::interner::Interner;
use crate::core::keytypes::{Kind, Path};

/// Where an edge of the graph points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Index of a node under the same top level
    Internal(usize),
    /// Dotted path defined elsewhere (possibly another distribution)
    External(Path),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub canonical: Path,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default)]
    pub children: BTreeMap<String, Target>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_of: Option<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<Target>,
}

impl Node {
    pub fn new(canonical: Path, kind: Kind) -> Self {
        Self {
            canonical,
            kind,
            children: BTreeMap::new(),
            type_of: None,
            bases: Vec::new(),
        }
    }
}

/// Reference to a node: the top level it lives under plus its index.
///
/// A lookup key, not a borrow; it stays meaningful across reloads of the
/// same graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Ref {
    pub toplevel: String,
    pub internal: usize,
}

impl Ref {
    pub fn toplevel(name: &str) -> Self {
        Self {
            toplevel: name.to_string(),
            internal: 0,
        }
    }
}

/// A walk left the graph through an external reference
#[derive(Debug, Clone, PartialEq)]
pub struct External {
    pub path: Path,
    pub rest: Vec<Arc<str>>,
}

impl External {
    /// The external path with the unwalked remainder re-attached
    pub fn with_rest(&self) -> Path {
        self.path.join(&self.rest)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    TopLevelNotFound(String),
    AttributeNotFound(Path),
    InvalidRef(Ref),
    NoType(Path),
    External(External),
}

impl From<GraphError> for ResourceError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::TopLevelNotFound(tl) => ResourceError::TopLevelNotFound(tl),
            GraphError::AttributeNotFound(path) => ResourceError::AttributeNotFound(path.to_string()),
            GraphError::InvalidRef(r) => ResourceError::InvalidSymbol(format!(
                "reference {}#{} is not in the symbol graph",
                r.toplevel, r.internal
            )),
            GraphError::NoType(path) => ResourceError::NoType(path.to_string()),
            GraphError::External(ext) => ResourceError::AttributeNotFound(ext.with_rest().to_string()),
        }
    }
}

type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    toplevels: BTreeMap<String, Vec<Node>>,
}

impl Graph {
    pub fn new(toplevels: BTreeMap<String, Vec<Node>>) -> Self {
        Self { toplevels }
    }

    pub fn toplevels(&self) -> impl Iterator<Item = &str> {
        self.toplevels.keys().map(String::as_str)
    }

    /// Every node with its reference, in top-level then index order
    pub fn nodes(&self) -> impl Iterator<Item = (Ref, &Node)> {
        self.toplevels.iter().flat_map(|(tl, nodes)| {
            nodes.iter().enumerate().map(move |(i, n)| {
                (
                    Ref {
                        toplevel: tl.clone(),
                        internal: i,
                    },
                    n,
                )
            })
        })
    }

    /// Walk `path` from its top-level module
    pub fn lookup(&self, path: &Path) -> GraphResult<Ref> {
        let toplevel = path.head();
        let nodes = self
            .toplevels
            .get(toplevel)
            .filter(|nodes| !nodes.is_empty())
            .ok_or_else(|| GraphError::TopLevelNotFound(toplevel.to_string()))?;

        let mut current = 0usize;
        for (i, part) in path.parts().iter().enumerate().skip(1) {
            let node = nodes.get(current).ok_or_else(|| {
                GraphError::InvalidRef(Ref {
                    toplevel: toplevel.to_string(),
                    internal: current,
                })
            })?;
            match node.children.get(&**part) {
                None => return Err(GraphError::AttributeNotFound(path.clone())),
                Some(Target::Internal(idx)) => current = *idx,
                Some(Target::External(ext)) => {
                    return Err(GraphError::External(External {
                        path: ext.clone(),
                        rest: path.parts()[i + 1..].to_vec(),
                    }));
                }
            }
        }

        Ok(Ref {
            toplevel: toplevel.to_string(),
            internal: current,
        })
    }

    fn node(&self, r: &Ref) -> GraphResult<&Node> {
        self.toplevels
            .get(&r.toplevel)
            .and_then(|nodes| nodes.get(r.internal))
            .ok_or_else(|| GraphError::InvalidRef(r.clone()))
    }

    fn follow(&self, from: &Ref, target: &Target) -> GraphResult<Ref> {
        match target {
            Target::Internal(idx) => {
                let r = Ref {
                    toplevel: from.toplevel.clone(),
                    internal: *idx,
                };
                self.node(&r)?;
                Ok(r)
            }
            Target::External(path) => Err(GraphError::External(External {
                path: path.clone(),
                rest: Vec::new(),
            })),
        }
    }

    pub fn canonical(&self, r: &Ref) -> GraphResult<Path> {
        Ok(self.node(r)?.canonical.clone())
    }

    pub fn kind(&self, r: &Ref) -> GraphResult<Kind> {
        Ok(self.node(r)?.kind)
    }

    pub fn type_of(&self, r: &Ref) -> GraphResult<Ref> {
        let node = self.node(r)?;
        match &node.type_of {
            Some(target) => self.follow(r, target),
            None => Err(GraphError::NoType(node.canonical.clone())),
        }
    }

    pub fn num_bases(&self, r: &Ref) -> GraphResult<usize> {
        Ok(self.node(r)?.bases.len())
    }

    pub fn base(&self, r: &Ref, i: usize) -> GraphResult<Ref> {
        let node = self.node(r)?;
        let target = node.bases.get(i).ok_or_else(|| GraphError::InvalidRef(r.clone()))?;
        self.follow(r, target)
    }

    pub fn children(&self, r: &Ref) -> GraphResult<Vec<String>> {
        Ok(self.node(r)?.children.keys().cloned().collect())
    }

    pub fn child(&self, r: &Ref, name: &str) -> GraphResult<Ref> {
        let node = self.node(r)?;
        match node.children.get(name) {
            Some(target) => self.follow(r, target),
            None => Err(GraphError::AttributeNotFound(node.canonical.with_tail(name))),
        }
    }

    /// Re-point every stored path at the manager's shared component table
    pub fn intern(&mut self, interner: &Interner) {
        for nodes in self.toplevels.values_mut() {
            for node in nodes.iter_mut() {
                node.canonical = interner.intern_path(&node.canonical);
                let targets = node
                    .children
                    .values_mut()
                    .chain(node.bases.iter_mut())
                    .chain(node.type_of.iter_mut());
                for target in targets {
                    if let Target::External(path) = target {
                        *path = interner.intern_path(path);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        let mut json = Node::new(Path::new("json"), Kind::Module);
        json.children.insert("dumps".into(), Target::Internal(1));
        json.children.insert("decoder".into(), Target::Internal(2));
        json.children.insert("JSONDecoder".into(), Target::Internal(3));
        json.children.insert("ordered".into(), Target::External(Path::new("collections.OrderedDict")));

        let dumps = Node::new(Path::new("json.dumps"), Kind::Function);

        let mut decoder = Node::new(Path::new("json.decoder"), Kind::Module);
        decoder.children.insert("JSONDecoder".into(), Target::Internal(3));

        let mut cls = Node::new(Path::new("json.decoder.JSONDecoder"), Kind::Type);
        cls.bases.push(Target::External(Path::new("builtins.object")));
        cls.bases.push(Target::Internal(2));
        cls.type_of = Some(Target::External(Path::new("builtins.type")));

        let mut toplevels = BTreeMap::new();
        toplevels.insert("json".to_string(), vec![json, dumps, decoder, cls]);
        Graph::new(toplevels)
    }

    #[test]
    fn lookup_follows_internal_aliases() {
        let graph = sample();
        let r = graph.lookup(&Path::new("json.JSONDecoder")).unwrap();
        assert_eq!(r.internal, 3);
        assert_eq!(graph.canonical(&r).unwrap(), Path::new("json.decoder.JSONDecoder"));
        assert_eq!(graph.kind(&r).unwrap(), Kind::Type);
    }

    #[test]
    fn lookup_reports_external_with_rest() {
        let graph = sample();
        match graph.lookup(&Path::new("json.ordered.fromkeys")) {
            Err(GraphError::External(ext)) => {
                assert_eq!(ext.with_rest(), Path::new("collections.OrderedDict.fromkeys"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lookup_misses() {
        let graph = sample();
        assert_eq!(
            graph.lookup(&Path::new("json.nope")),
            Err(GraphError::AttributeNotFound(Path::new("json.nope")))
        );
        assert_eq!(
            graph.lookup(&Path::new("yaml.load")),
            Err(GraphError::TopLevelNotFound("yaml".into()))
        );
    }

    #[test]
    fn structural_queries() {
        let graph = sample();
        let cls = graph.lookup(&Path::new("json.decoder.JSONDecoder")).unwrap();
        assert_eq!(graph.num_bases(&cls).unwrap(), 2);
        assert!(matches!(graph.base(&cls, 0), Err(GraphError::External(_))));
        assert_eq!(graph.base(&cls, 1).unwrap().internal, 2);
        assert!(matches!(graph.type_of(&cls), Err(GraphError::External(_))));

        let dumps = graph.lookup(&Path::new("json.dumps")).unwrap();
        assert!(matches!(graph.type_of(&dumps), Err(GraphError::NoType(_))));

        let root = Ref::toplevel("json");
        assert_eq!(
            graph.children(&root).unwrap(),
            vec!["JSONDecoder", "decoder", "dumps", "ordered"]
        );
        assert_eq!(graph.child(&root, "dumps").unwrap().internal, 1);
    }

    #[test]
    fn stale_refs_are_errors() {
        let graph = sample();
        let bogus = Ref {
            toplevel: "json".into(),
            internal: 99,
        };
        assert!(matches!(graph.kind(&bogus), Err(GraphError::InvalidRef(_))));
    }

    #[test]
    fn deserializes_from_json() {
        let raw = r#"{
            "pkg": [
                {"canonical": "pkg", "kind": "module", "children": {"f": {"internal": 1}, "g": {"external": "other.g"}}},
                {"canonical": "pkg.f", "kind": "function"}
            ]
        }"#;
        let graph: Graph = serde_json::from_str(raw).unwrap();
        assert_eq!(graph.toplevels().collect::<Vec<_>>(), vec!["pkg"]);
        assert_eq!(graph.nodes().count(), 2);
        assert!(matches!(graph.lookup(&Path::new("pkg.g")), Err(GraphError::External(_))));
    }
}
