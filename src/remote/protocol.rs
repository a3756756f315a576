//! Wire types for the `ResourceManager` service.
//!
//! Frames are length delimited; each frame carries one MessagePack encoded
//! [`Envelope`] (client to server) or [`ReplyEnvelope`] (server to client).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;
use crate::{Result, ResourceError};
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};

/// Name the service is exposed under
pub const SERVICE_NAME: &str = "ResourceManager";

const MAX_FRAME_LENGTH: usize = 64 << 20;

/// One variant per remotely callable manager method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Distributions,
    DistributionLoaded { dist: Distribution },
    Packages,
    DistributionsForPackage { name: String },
    ResolvePath { path: Path },
    ResolveSymbol { path: Path },
    NewSymbol { dist: Distribution, path: Path },
    ChildSymbol { symbol: Symbol, name: String },
    Kind { symbol: Symbol },
    SymbolType { symbol: Symbol },
    Bases { symbol: Symbol },
    Children { symbol: Symbol },
    CanonicalSymbols { dist: Distribution },
    TopLevels { dist: Distribution },
    Documentation { symbol: Symbol },
    SymbolCounts { symbol: Symbol },
    ArgSpec { symbol: Symbol },
    Signatures { symbol: Symbol },
    SigStats { symbol: Symbol },
    Kwargs { symbol: Symbol },
    KeywordArgFrequency { symbol: Symbol, arg: String },
    NumArgsFrequency { symbol: Symbol, num_args: usize },
    CumulativeNumArgsFrequency { symbol: Symbol, num_args: usize },
    ReturnTypes { symbol: Symbol },
    TruthyReturnTypes { symbol: Symbol },
    Reset,
}

impl Request {
    /// Procedure name, as `ResourceManager.<Variant>`
    pub fn procedure(&self) -> String {
        format!("{}.{}", SERVICE_NAME, self.method())
    }

    pub fn method(&self) -> &'static str {
        match self {
            Request::Distributions => "Distributions",
            Request::DistributionLoaded { .. } => "DistributionLoaded",
            Request::Packages => "Packages",
            Request::DistributionsForPackage { .. } => "DistributionsForPackage",
            Request::ResolvePath { .. } => "ResolvePath",
            Request::ResolveSymbol { .. } => "ResolveSymbol",
            Request::NewSymbol { .. } => "NewSymbol",
            Request::ChildSymbol { .. } => "ChildSymbol",
            Request::Kind { .. } => "Kind",
            Request::SymbolType { .. } => "SymbolType",
            Request::Bases { .. } => "Bases",
            Request::Children { .. } => "Children",
            Request::CanonicalSymbols { .. } => "CanonicalSymbols",
            Request::TopLevels { .. } => "TopLevels",
            Request::Documentation { .. } => "Documentation",
            Request::SymbolCounts { .. } => "SymbolCounts",
            Request::ArgSpec { .. } => "ArgSpec",
            Request::Signatures { .. } => "Signatures",
            Request::SigStats { .. } => "SigStats",
            Request::Kwargs { .. } => "Kwargs",
            Request::KeywordArgFrequency { .. } => "KeywordArgFrequency",
            Request::NumArgsFrequency { .. } => "NumArgsFrequency",
            Request::CumulativeNumArgsFrequency { .. } => "CumulativeNumArgsFrequency",
            Request::ReturnTypes { .. } => "ReturnTypes",
            Request::TruthyReturnTypes { .. } => "TruthyReturnTypes",
            Request::Reset => "Reset",
        }
    }
}

/// A populated response value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Unit,
    Bool(bool),
    Distributions(Vec<Distribution>),
    Strings(Vec<String>),
    Symbol(Symbol),
    Symbols(Vec<Symbol>),
    TruthySymbols(Vec<TruthySymbol>),
    Kind(Kind),
    Documentation(Documentation),
    SymbolCounts(SymbolCounts),
    ArgSpec(ArgSpec),
    Signatures(Vec<Signature>),
    SigStats(SigStats),
    Kwargs(KeywordArgs),
    Count(u64),
    Frequency(f64),
}

impl Response {
    pub fn variant(&self) -> &'static str {
        match self {
            Response::Unit => "Unit",
            Response::Bool(_) => "Bool",
            Response::Distributions(_) => "Distributions",
            Response::Strings(_) => "Strings",
            Response::Symbol(_) => "Symbol",
            Response::Symbols(_) => "Symbols",
            Response::TruthySymbols(_) => "TruthySymbols",
            Response::Kind(_) => "Kind",
            Response::Documentation(_) => "Documentation",
            Response::SymbolCounts(_) => "SymbolCounts",
            Response::ArgSpec(_) => "ArgSpec",
            Response::Signatures(_) => "Signatures",
            Response::SigStats(_) => "SigStats",
            Response::Kwargs(_) => "Kwargs",
            Response::Count(_) => "Count",
            Response::Frequency(_) => "Frequency",
        }
    }
}

/// Outcome of one call: a value, the "no value" marker, or a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Value(Response),
    NoValue,
    Error(WireError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub call: Request,
}

/// The id of a request whose call could not be decoded
#[derive(Debug, Deserialize)]
pub struct EnvelopeId {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: u64,
    pub reply: Reply,
}

/// Serializable mirror of [`ResourceError`].
///
/// Domain errors keep their variant across the connection; local failures
/// of the server (I/O, network) arrive as [`ResourceError::Rpc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireError {
    TopLevelNotFound(String),
    AttributeNotFound(String),
    NoDistributionsMatch(Path),
    PathNotFound { path: Path, cause: Box<WireError> },
    DistributionUnloadable { dist: String, reason: String },
    RecursionLimitExceeded(usize),
    NoType(String),
    InvalidSymbol(String),
    Config(String),
    Serialization(String),
    Closed,
    Remote(String),
}

impl From<&ResourceError> for WireError {
    fn from(err: &ResourceError) -> Self {
        match err {
            ResourceError::TopLevelNotFound(s) => WireError::TopLevelNotFound(s.clone()),
            ResourceError::AttributeNotFound(s) => WireError::AttributeNotFound(s.clone()),
            ResourceError::NoDistributionsMatch(p) => WireError::NoDistributionsMatch(p.clone()),
            ResourceError::PathNotFound { path, cause } => WireError::PathNotFound {
                path: path.clone(),
                cause: Box::new(cause.as_ref().into()),
            },
            ResourceError::DistributionUnloadable { dist, reason } => {
                WireError::DistributionUnloadable {
                    dist: dist.to_string(),
                    reason: reason.clone(),
                }
            }
            ResourceError::RecursionLimitExceeded(depth) => WireError::RecursionLimitExceeded(*depth),
            ResourceError::NoType(s) => WireError::NoType(s.clone()),
            ResourceError::InvalidSymbol(s) => WireError::InvalidSymbol(s.clone()),
            ResourceError::Config(s) => WireError::Config(s.clone()),
            ResourceError::Serialization(s) => WireError::Serialization(s.clone()),
            ResourceError::Closed => WireError::Closed,
            other => WireError::Remote(other.to_string()),
        }
    }
}

impl From<WireError> for ResourceError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::TopLevelNotFound(s) => ResourceError::TopLevelNotFound(s),
            WireError::AttributeNotFound(s) => ResourceError::AttributeNotFound(s),
            WireError::NoDistributionsMatch(p) => ResourceError::NoDistributionsMatch(p),
            WireError::PathNotFound { path, cause } => ResourceError::PathNotFound {
                path,
                cause: Box::new((*cause).into()),
            },
            WireError::DistributionUnloadable { dist, reason } => {
                ResourceError::DistributionUnloadable {
                    dist: dist.parse().unwrap_or_default(),
                    reason,
                }
            }
            WireError::RecursionLimitExceeded(depth) => ResourceError::RecursionLimitExceeded(depth),
            WireError::NoType(s) => ResourceError::NoType(s),
            WireError::InvalidSymbol(s) => ResourceError::InvalidSymbol(s),
            WireError::Config(s) => ResourceError::Config(s),
            WireError::Serialization(s) => ResourceError::Serialization(s),
            WireError::Closed => ResourceError::Closed,
            WireError::Remote(s) => ResourceError::Rpc(s),
        }
    }
}

/// Server side: the single place a call outcome becomes a reply
pub fn to_reply(result: Result<Option<Response>>) -> Reply {
    match result {
        Ok(Some(value)) => Reply::Value(value),
        Ok(None) | Err(ResourceError::RemoteSentinel) => Reply::NoValue,
        Err(e) => Reply::Error(WireError::from(&e)),
    }
}

/// Client side: the single place a reply becomes a call outcome
pub fn from_reply(reply: Reply) -> Result<Option<Response>> {
    match reply {
        Reply::Value(value) => Ok(Some(value)),
        Reply::NoValue => Ok(None),
        Reply::Error(e) => Err(e.into()),
    }
}

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    rmp_serde::to_vec_named(value)
        .map(Bytes::from)
        .map_err(|e| ResourceError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    rmp_serde::from_slice(frame).map_err(|e| ResourceError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_value_is_distinct_from_errors_and_values() {
        assert_eq!(to_reply(Ok(None)), Reply::NoValue);
        assert_eq!(to_reply(Err(ResourceError::RemoteSentinel)), Reply::NoValue);
        assert_eq!(
            to_reply(Ok(Some(Response::Count(0)))),
            Reply::Value(Response::Count(0))
        );
        assert!(matches!(from_reply(Reply::NoValue), Ok(None)));
    }

    #[test]
    fn errors_keep_their_variant() {
        let err = ResourceError::PathNotFound {
            path: Path::new("requests.compat.json.dumps"),
            cause: Box::new(ResourceError::RecursionLimitExceeded(10)),
        };
        let reply = to_reply(Err(err));
        let frame = encode(&ReplyEnvelope { id: 7, reply }).unwrap();
        let back: ReplyEnvelope = decode(&frame).unwrap();
        assert_eq!(back.id, 7);

        let err = from_reply(back.reply).unwrap_err();
        assert!(err.is_recursion_limit());
        assert!(matches!(err, ResourceError::PathNotFound { .. }));
    }

    #[test]
    fn local_failures_become_rpc_errors() {
        let io = ResourceError::Io(std::io::Error::other("disk gone"));
        let err: ResourceError = WireError::from(&io).into();
        assert!(matches!(err, ResourceError::Rpc(msg) if msg.contains("disk gone")));
    }

    #[test]
    fn unloadable_nil_distribution_survives() {
        let err = ResourceError::DistributionUnloadable {
            dist: Distribution::default(),
            reason: "empty distribution".into(),
        };
        let back: ResourceError = WireError::from(&err).into();
        assert!(matches!(back, ResourceError::DistributionUnloadable { dist, .. } if dist.is_nil()));
    }

    #[test]
    fn documentation_without_html_decodes() {
        let doc = Documentation {
            text: "Serialize obj to a JSON formatted str.".into(),
            html: String::new(),
        };
        let frame = encode(&Reply::Value(Response::Documentation(doc.clone()))).unwrap();
        let back: Reply = decode(&frame).unwrap();
        assert_eq!(back, Reply::Value(Response::Documentation(doc)));
    }
}
