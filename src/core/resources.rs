//! The in-memory bundle of facts loaded for one distribution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use rustc_hash::FxHashMap;
use crate::{Result, ResourceError};
use crate::core::interner::Interner;
use crate::core::symgraph::Graph;

/// The resource types a manifest entry can locate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SymbolGraph,
    Documentation,
    SymbolCounts,
    ArgSpecs,
    Signatures,
    SigStats,
    Kwargs,
    ReturnTypes,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::SymbolGraph,
        ResourceKind::Documentation,
        ResourceKind::SymbolCounts,
        ResourceKind::ArgSpecs,
        ResourceKind::Signatures,
        ResourceKind::SigStats,
        ResourceKind::Kwargs,
        ResourceKind::ReturnTypes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::SymbolGraph => "symbol_graph",
            ResourceKind::Documentation => "documentation",
            ResourceKind::SymbolCounts => "symbol_counts",
            ResourceKind::ArgSpecs => "arg_specs",
            ResourceKind::Signatures => "signatures",
            ResourceKind::SigStats => "sig_stats",
            ResourceKind::Kwargs => "kwargs",
            ResourceKind::ReturnTypes => "return_types",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ResourceError::Config(format!("unknown resource kind {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Documentation {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,
}

/// How often a symbol is referenced in the corpus, by reference style
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolCounts {
    #[serde(default)]
    pub import: u64,
    #[serde(default)]
    pub name: u64,
    #[serde(default)]
    pub attribute: u64,
    #[serde(default)]
    pub expr: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub import_aliases: BTreeMap<String, u64>,
}

impl SymbolCounts {
    pub fn total(&self) -> u64 {
        self.import + self.name + self.attribute + self.expr
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default)]
    pub keyword_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vararg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwarg: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureArg {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// A popular call pattern observed for a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub args: Vec<SignatureArg>,
    #[serde(default)]
    pub kwargs: Vec<SignatureArg>,
    #[serde(default)]
    pub frequency: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgStat {
    pub count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, u64>,
}

/// Aggregate statistics over observed calls of a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigStats {
    pub count: u64,
    #[serde(default)]
    pub positional: Vec<ArgStat>,
    #[serde(default)]
    pub args_by_name: BTreeMap<String, ArgStat>,
    /// calls bucketed by total argument count
    #[serde(default)]
    pub num_args: BTreeMap<usize, u64>,
}

impl SigStats {
    pub fn keyword_frequency(&self, arg: &str) -> Option<u64> {
        self.args_by_name.get(arg).map(|a| a.count)
    }

    pub fn num_args_frequency(&self, num_args: usize) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let calls = self.num_args.get(&num_args).copied().unwrap_or(0);
        Some(calls as f64 / self.count as f64)
    }

    pub fn cumulative_num_args_frequency(&self, num_args: usize) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let calls: u64 = self.num_args.range(..=num_args).map(|(_, c)| c).sum();
        Some(calls as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordArg {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// Keyword names observed flowing into a function's `**kwargs`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordArgs {
    pub name: String,
    #[serde(default)]
    pub kwargs: Vec<KeywordArg>,
}

/// Where a return type fact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truthiness {
    Stub,
    Docs,
    Inferred,
}

pub type FactTable<T> = FxHashMap<String, T>;

/// All loaded facts for one distribution; read-only once published.
///
/// Fact tables are keyed by canonical dotted path. A missing table means the
/// distribution ships no data of that kind.
#[derive(Debug, Clone, Default)]
pub struct ResourceGroup {
    pub symbol_graph: Graph,
    pub documentation: Option<FactTable<Documentation>>,
    pub symbol_counts: Option<FactTable<SymbolCounts>>,
    pub arg_specs: Option<FactTable<ArgSpec>>,
    pub signatures: Option<FactTable<Vec<Signature>>>,
    pub sig_stats: Option<FactTable<SigStats>>,
    pub kwargs: Option<FactTable<KeywordArgs>>,
    pub return_types: Option<FactTable<BTreeMap<String, Truthiness>>>,
}

impl ResourceGroup {
    pub fn new(symbol_graph: Graph) -> Self {
        Self {
            symbol_graph,
            ..Default::default()
        }
    }

    pub fn intern(&mut self, interner: &Interner) {
        self.symbol_graph.intern(interner);
    }
}

/// Look up a fact for a canonical path in an optional table
pub fn fact<'a, T>(table: &'a Option<FactTable<T>>, path: &str) -> Option<&'a T> {
    table.as_ref().and_then(|t| t.get(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kind_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn sig_stats_frequencies() {
        let mut stats = SigStats {
            count: 10,
            ..Default::default()
        };
        stats.num_args.insert(0, 2);
        stats.num_args.insert(1, 5);
        stats.num_args.insert(3, 3);
        stats.args_by_name.insert(
            "indent".into(),
            ArgStat {
                count: 4,
                types: BTreeMap::new(),
            },
        );

        assert_eq!(stats.num_args_frequency(1), Some(0.5));
        assert_eq!(stats.num_args_frequency(2), Some(0.0));
        assert_eq!(stats.cumulative_num_args_frequency(1), Some(0.7));
        assert_eq!(stats.cumulative_num_args_frequency(3), Some(1.0));
        assert_eq!(stats.keyword_frequency("indent"), Some(4));
        assert_eq!(stats.keyword_frequency("sort_keys"), None);

        let empty = SigStats::default();
        assert_eq!(empty.num_args_frequency(0), None);
    }

    #[test]
    fn missing_table_is_no_data() {
        let group = ResourceGroup::default();
        assert!(fact(&group.documentation, "json.dumps").is_none());
    }
}
