//! Value types shared by every layer: distributions, dotted paths and kinds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use crate::{Result, ResourceError};
use crate::utils::hash::path_hash;

/// Name of the distribution that holds the Python standard library
pub const BUILTIN_DISTRIBUTION_NAME: &str = "builtin-stdlib";

/// A named, versioned package whose metadata is loaded as a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Distribution {
    pub name: String,
    pub version: String,
}

impl Distribution {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The standard library distribution for a Python version
    pub fn builtin(version: impl Into<String>) -> Self {
        Self::new(BUILTIN_DISTRIBUTION_NAME, version)
    }

    pub fn is_builtin(&self) -> bool {
        self.name == BUILTIN_DISTRIBUTION_NAME
    }

    /// The zero distribution, carried by nil symbols
    pub fn is_nil(&self) -> bool {
        self.name.is_empty()
    }
}

impl Ord for Distribution {
    fn cmp(&self, other: &Self) -> Ordering {
        // builtins sort before everything else
        other
            .is_builtin()
            .cmp(&self.is_builtin())
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for Distribution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

impl FromStr for Distribution {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, version) = s
            .split_once("==")
            .ok_or_else(|| ResourceError::Config(format!("invalid distribution string {:?}", s)))?;
        if name.is_empty() {
            return Err(ResourceError::Config(format!("invalid distribution string {:?}", s)));
        }
        Ok(Self::new(name, version))
    }
}

impl TryFrom<String> for Distribution {
    type Error = ResourceError;

    fn try_from(s: String) -> Result<Self> {
        // the nil distribution travels as an empty string
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.parse()
    }
}

impl From<Distribution> for String {
    fn from(d: Distribution) -> String {
        if d.is_nil() {
            return String::new();
        }
        d.to_string()
    }
}

/// An attribute path such as `json.decoder.JSONDecoder`, with a precomputed hash
#[derive(Clone)]
pub struct Path {
    parts: Arc<[Arc<str>]>,
    hash: u64,
}

impl Path {
    /// Parse a dotted string; the empty string yields the empty path
    pub fn new(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::default();
        }
        Self::from_parts(dotted.split('.'))
    }

    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self::from_shared(parts.into_iter().map(Into::into).collect())
    }

    pub(crate) fn from_shared(parts: Vec<Arc<str>>) -> Self {
        let hash = path_hash(&parts.join("."));
        Self {
            parts: parts.into(),
            hash,
        }
    }

    pub fn parts(&self) -> &[Arc<str>] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// First component ("top level"); empty for the empty path
    pub fn head(&self) -> &str {
        self.parts.first().map(|p| &**p).unwrap_or("")
    }

    pub fn last(&self) -> &str {
        self.parts.last().map(|p| &**p).unwrap_or("")
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// A new path with one more component
    pub fn with_tail(&self, tail: &str) -> Self {
        let mut parts = self.parts.to_vec();
        parts.push(Arc::from(tail));
        Self::from_shared(parts)
    }

    /// A new path with every component of `rest` appended
    pub fn join(&self, rest: &[Arc<str>]) -> Self {
        if rest.is_empty() {
            return self.clone();
        }
        let mut parts = self.parts.to_vec();
        parts.extend(rest.iter().cloned());
        Self::from_shared(parts)
    }
}

impl Default for Path {
    fn default() -> Self {
        Self {
            parts: Arc::from(Vec::<Arc<str>>::new()),
            hash: path_hash(""),
        }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.parts == other.parts
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for Path {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Path::new(&s))
    }
}

/// A path qualified by the distribution it lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub dist: Distribution,
    pub path: Path,
}

impl SymbolKey {
    pub fn new(dist: Distribution, path: Path) -> Self {
        Self { dist, path }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.dist)
    }
}

/// Classification of a symbol graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    None,
    Function,
    Type,
    Module,
    Descriptor,
    Object,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::None => "none",
            Kind::Function => "function",
            Kind::Type => "type",
            Kind::Module => "module",
            Kind::Descriptor => "descriptor",
            Kind::Object => "object",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_distribution_round_trips_through_serde() {
        let json = serde_json::to_string(&Distribution::default()).unwrap();
        assert_eq!(json, "\"\"");
        let back: Distribution = serde_json::from_str(&json).unwrap();
        assert!(back.is_nil());

        let dist = Distribution::new("requests", "2.22.0");
        let json = serde_json::to_string(&dist).unwrap();
        assert_eq!(serde_json::from_str::<Distribution>(&json).unwrap(), dist);
        assert!("==1.0".parse::<Distribution>().is_err());
    }

    #[test]
    fn builtin_distribution_sorts_first() {
        let mut dists = vec![
            Distribution::new("alembic", "1.0"),
            Distribution::new("zope", "4.0"),
            Distribution::builtin("3.7"),
            Distribution::new("alembic", "0.9"),
        ];
        dists.sort();
        assert_eq!(dists[0], Distribution::builtin("3.7"));
        assert_eq!(dists[1], Distribution::new("alembic", "0.9"));
        assert_eq!(dists[2], Distribution::new("alembic", "1.0"));
        assert_eq!(dists[3], Distribution::new("zope", "4.0"));
    }

    #[test]
    fn distribution_string_form() {
        let dist: Distribution = "requests==2.22.0".parse().unwrap();
        assert_eq!(dist, Distribution::new("requests", "2.22.0"));
        assert_eq!(dist.to_string(), "requests==2.22.0");
        assert!("requests".parse::<Distribution>().is_err());
        assert!("==1.0".parse::<Distribution>().is_err());

        let json = serde_json::to_string(&dist).unwrap();
        assert_eq!(json, "\"requests==2.22.0\"");
        let back: Distribution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dist);
    }

    #[test]
    fn path_components() {
        let path = Path::new("json.decoder.JSONDecoder");
        assert_eq!(path.len(), 3);
        assert_eq!(path.head(), "json");
        assert_eq!(path.last(), "JSONDecoder");
        assert_eq!(path.to_string(), "json.decoder.JSONDecoder");
        assert_eq!(path.with_tail("decode").to_string(), "json.decoder.JSONDecoder.decode");
        assert_eq!(Path::new("json").join(&path.parts()[1..]), path);
    }

    #[test]
    fn empty_path() {
        let path = Path::new("");
        assert!(path.is_empty());
        assert_eq!(path.head(), "");
        assert_eq!(path, Path::default());
    }

    #[test]
    fn path_hash_tracks_contents() {
        assert_eq!(Path::new("a.b").hash(), Path::from_parts(["a", "b"]).hash());
        assert_ne!(Path::new("a.b").hash(), Path::new("a.c").hash());
    }
}
