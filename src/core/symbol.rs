//! Symbols: the handle callers hold, pairing what was asked for with what it
//! canonicalizes to.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use crate::{Result, ResourceError};
use crate::core::keytypes::{Distribution, Path, SymbolKey};
use crate::core::resources::Truthiness;
use crate::core::symgraph::Ref;
use crate::utils::hash::symbol_hash;

const COMPACT_MARKER: u8 = b'a';
const DUAL_MARKER: u8 = b'b';

/// A validated, canonicalized reference to one attribute path.
///
/// Only the manager produces symbols; the graph reference is a lookup key
/// into the canonical distribution's resource group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Symbol {
    queried: SymbolKey,
    canonical: SymbolKey,
    reference: Ref,
}

impl Symbol {
    pub(crate) fn new(queried: SymbolKey, canonical: SymbolKey, reference: Ref) -> Self {
        Self {
            queried,
            canonical,
            reference,
        }
    }

    /// A symbol that is its own canonical form
    pub(crate) fn canonical_at(key: SymbolKey, reference: Ref) -> Self {
        Self::new(key.clone(), key, reference)
    }

    /// The same canonical target, reached under a different queried key
    pub(crate) fn requeried(mut self, queried: SymbolKey) -> Self {
        self.queried = queried;
        self
    }

    pub(crate) fn reference(&self) -> &Ref {
        &self.reference
    }

    pub fn dist(&self) -> &Distribution {
        &self.queried.dist
    }

    pub fn path(&self) -> &Path {
        &self.queried.path
    }

    pub fn path_head(&self) -> &str {
        self.queried.path.head()
    }

    pub fn path_last(&self) -> &str {
        self.queried.path.last()
    }

    pub fn path_string(&self) -> String {
        self.queried.path.to_string()
    }

    pub fn path_hash(&self) -> u64 {
        self.queried.path.hash()
    }

    pub fn queried_key(&self) -> &SymbolKey {
        &self.queried
    }

    pub fn canonical_key(&self) -> &SymbolKey {
        &self.canonical
    }

    /// The canonical form as a symbol of its own
    pub fn canonical(&self) -> Symbol {
        Symbol::canonical_at(self.canonical.clone(), self.reference.clone())
    }

    pub fn is_canonical(&self) -> bool {
        self.queried.dist == self.canonical.dist && self.queried.path.hash() == self.canonical.path.hash()
    }

    pub fn is_nil(&self) -> bool {
        self.queried.path.is_empty() && self.queried.dist.is_nil()
    }

    /// Stable hash of the queried distribution and path
    pub fn hash(&self) -> u64 {
        let dist = &self.queried.dist;
        symbol_hash(&dist.name, &dist.version, &self.path_string())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        if self.is_canonical() {
            buf.put_u8(COMPACT_MARKER);
            put_key(&mut buf, &self.queried);
        } else {
            buf.put_u8(DUAL_MARKER);
            put_key(&mut buf, &self.queried);
            put_key(&mut buf, &self.canonical);
        }
        buf.put_i64(self.reference.internal as i64);
        put_line(&mut buf, &self.reference.toplevel);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let buf = &mut data;
        if !buf.has_remaining() {
            return Err(invalid("empty symbol encoding"));
        }
        let (queried, canonical) = match buf.get_u8() {
            COMPACT_MARKER => {
                let key = get_key(buf)?;
                (key.clone(), key)
            }
            DUAL_MARKER => (get_key(buf)?, get_key(buf)?),
            other => return Err(invalid(format!("unknown symbol marker {:#04x}", other))),
        };
        if buf.remaining() < 8 {
            return Err(invalid("truncated reference"));
        }
        let internal = usize::try_from(buf.get_i64())
            .map_err(|_| invalid("negative reference index"))?;
        let toplevel = get_line(buf)?;
        Ok(Symbol::new(queried, canonical, Ref { toplevel, internal }))
    }
}

fn invalid(msg: impl Into<String>) -> ResourceError {
    ResourceError::InvalidSymbol(msg.into())
}

fn put_line(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(b'\n');
}

fn put_key(buf: &mut BytesMut, key: &SymbolKey) {
    buf.put_u64(key.path.hash());
    buf.put_i64(key.path.len() as i64);
    for part in key.path.parts() {
        put_line(buf, part);
    }
    if key.dist.is_nil() {
        put_line(buf, "");
    } else {
        put_line(buf, &key.dist.to_string());
    }
}

fn get_line(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| invalid("unterminated field"))?;
    let line = std::str::from_utf8(&buf[..end])
        .map_err(|e| invalid(e.to_string()))?
        .to_string();
    buf.advance(end + 1);
    Ok(line)
}

fn get_key(buf: &mut &[u8]) -> Result<SymbolKey> {
    if buf.remaining() < 16 {
        return Err(invalid("truncated symbol key"));
    }
    let hash = buf.get_u64();
    let count = buf.get_i64();
    if count < 0 {
        return Err(invalid("negative part count"));
    }
    let mut parts: Vec<Arc<str>> = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        parts.push(Arc::from(get_line(buf)?));
    }
    let path = Path::from_parts(parts);
    if path.hash() != hash {
        return Err(invalid(format!("hash mismatch for {}", path)));
    }
    let dist = get_line(buf)?;
    let dist = if dist.is_empty() {
        Distribution::default()
    } else {
        dist.parse()?
    };
    Ok(SymbolKey::new(dist, path))
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_canonical() {
            write!(f, "{}", self.canonical)
        } else {
            write!(f, "Symbol({} -> {})", self.queried, self.canonical)
        }
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.queried
            .cmp(&other.queried)
            .then_with(|| self.canonical.cmp(&other.canonical))
            .then_with(|| self.reference.cmp(&other.reference))
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.encode())
    }
}

struct SymbolVisitor;

impl<'de> Visitor<'de> for SymbolVisitor {
    type Value = Symbol;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an encoded symbol")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Symbol, E> {
        Symbol::decode(v).map_err(E::custom)
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Symbol, E> {
        self.visit_bytes(&v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Symbol, A::Error> {
        let mut raw = Vec::with_capacity(seq.size_hint().unwrap_or(64));
        while let Some(b) = seq.next_element::<u8>()? {
            raw.push(b);
        }
        self.visit_bytes(&raw)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(SymbolVisitor)
    }
}

/// A return type together with where the fact came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TruthySymbol {
    pub symbol: Symbol,
    pub truthiness: Truthiness,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(dist: &str, path: &str) -> SymbolKey {
        SymbolKey::new(dist.parse().unwrap(), Path::new(path))
    }

    fn compact() -> Symbol {
        Symbol::canonical_at(
            key("builtin-stdlib==3.7", "json.dumps"),
            Ref {
                toplevel: "json".into(),
                internal: 4,
            },
        )
    }

    fn dual() -> Symbol {
        Symbol::new(
            key("requests==2.22.0", "requests.compat.json"),
            key("builtin-stdlib==3.7", "json"),
            Ref::toplevel("json"),
        )
    }

    #[test]
    fn encoding_round_trips_both_forms() {
        for sym in [compact(), dual(), Symbol::default()] {
            let decoded = Symbol::decode(&sym.encode()).unwrap();
            assert_eq!(decoded, sym);
        }
        assert_eq!(compact().encode()[0], b'a');
        assert_eq!(dual().encode()[0], b'b');
    }

    #[test]
    fn decode_rejects_corruption() {
        assert!(Symbol::decode(b"").is_err());
        assert!(Symbol::decode(b"z").is_err());

        let mut raw = compact().encode().to_vec();
        // flip a byte of the stored path hash
        raw[1] ^= 0xff;
        assert!(matches!(Symbol::decode(&raw), Err(ResourceError::InvalidSymbol(_))));

        let raw = compact().encode();
        assert!(Symbol::decode(&raw[..raw.len() - 3]).is_err());
    }

    #[test]
    fn canonical_is_idempotent() {
        let sym = dual();
        assert!(!sym.is_canonical());
        let canon = sym.canonical();
        assert!(canon.is_canonical());
        assert_eq!(canon.canonical(), canon);
        assert_eq!(canon.path_string(), "json");
    }

    #[test]
    fn display_forms() {
        assert_eq!(compact().to_string(), "json.dumps (builtin-stdlib==3.7)");
        assert_eq!(
            dual().to_string(),
            "Symbol(requests.compat.json (requests==2.22.0) -> json (builtin-stdlib==3.7))"
        );
    }

    #[test]
    fn serde_uses_the_binary_encoding() {
        let sym = dual();
        let packed = rmp_serde::to_vec(&sym).unwrap();
        assert_eq!(rmp_serde::from_slice::<Symbol>(&packed).unwrap(), sym);

        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(serde_json::from_str::<Symbol>(&json).unwrap(), sym);
    }

    #[test]
    fn accessors_follow_the_queried_key() {
        let sym = dual();
        assert_eq!(sym.path_head(), "requests");
        assert_eq!(sym.path_last(), "json");
        assert_eq!(sym.dist(), &Distribution::new("requests", "2.22.0"));
        assert!(Symbol::default().is_nil());
        assert_ne!(sym.hash(), compact().hash());
    }
}
