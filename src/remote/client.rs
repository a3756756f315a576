use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::{Result, ResourceError, constants::RPC_TIMEOUT};
use crate::core::keytypes::{Distribution, Kind, Path};
use crate::core::manager::Manager;
use crate::core::resources::{ArgSpec, Documentation, KeywordArgs, SigStats, Signature, SymbolCounts};
use crate::core::symbol::{Symbol, TruthySymbol};
use crate::remote::protocol::{self, Envelope, Reply, ReplyEnvelope, Request, Response};

type Pending = Arc<parking_lot::Mutex<FxHashMap<u64, oneshot::Sender<Reply>>>>;

/// A [`Manager`] whose calls run on a remote [`RpcServer`](crate::RpcServer).
///
/// Concurrent calls share one connection and are matched to replies by id.
pub struct RpcClient {
    outgoing: mpsc::UnboundedSender<Bytes>,
    pending: Pending,
    next_id: AtomicU64,
    errors: AtomicU64,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl RpcClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected to resource server");

        let (mut sink, mut frames) = Framed::new(stream, protocol::codec()).split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let pending: Pending = Arc::default();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "rpc write failed");
                    writer_shutdown.cancel();
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    frame = frames.next() => match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            warn!(error = %e, "rpc read failed");
                            break;
                        }
                        None => break,
                    },
                };
                match protocol::decode::<ReplyEnvelope>(&frame) {
                    Ok(ReplyEnvelope { id, reply }) => {
                        if let Some(waiter) = reader_pending.lock().remove(&id) {
                            // the caller may have timed out
                            let _ = waiter.send(reply);
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed reply"),
                }
            }
            // mark the connection dead before waking every caller still waiting
            reader_shutdown.cancel();
            reader_pending.lock().clear();
        });

        Ok(Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            errors: AtomicU64::new(0),
            timeout: Some(RPC_TIMEOUT),
            shutdown,
        })
    }

    /// Per-call timeout; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Failed calls so far, not counting "no value" replies
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    async fn call(&self, request: Request) -> Result<Option<Response>> {
        let result = self.round_trip(request).await;
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn round_trip(&self, request: Request) -> Result<Option<Response>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let procedure = request.procedure();
        let frame = protocol::encode(&Envelope { id, call: request })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        if self.shutdown.is_cancelled() || self.outgoing.send(frame).is_err() {
            self.pending.lock().remove(&id);
            return Err(ResourceError::Rpc(format!("{}: connection closed", procedure)));
        }

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(ResourceError::Rpc(format!(
                        "{}: timed out after {:?}",
                        procedure, limit
                    )));
                }
            },
            None => rx.await,
        };
        let reply = reply
            .map_err(|_| ResourceError::Rpc(format!("{}: connection closed", procedure)))?;
        protocol::from_reply(reply)
    }

    /// Call a procedure that always produces a value
    async fn value(&self, request: Request) -> Result<Response> {
        let procedure = request.procedure();
        match self.call(request).await? {
            Some(response) => Ok(response),
            None => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(ResourceError::Rpc(format!("{}: unexpected empty reply", procedure)))
            }
        }
    }

    fn unexpected(&self, response: &Response) -> ResourceError {
        self.errors.fetch_add(1, Ordering::Relaxed);
        ResourceError::Rpc(format!("unexpected {} response", response.variant()))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Unwrap a response of the expected variant
macro_rules! expect_response {
    ($client:expr, $response:expr, $variant:path) => {
        match $response {
            $variant(value) => Ok(value),
            other => Err($client.unexpected(&other)),
        }
    };
}

#[async_trait]
impl Manager for RpcClient {
    async fn distributions(&self) -> Result<Vec<Distribution>> {
        let response = self.value(Request::Distributions).await?;
        expect_response!(self, response, Response::Distributions)
    }

    async fn distribution_loaded(&self, dist: &Distribution) -> Result<bool> {
        let response = self
            .value(Request::DistributionLoaded { dist: dist.clone() })
            .await?;
        expect_response!(self, response, Response::Bool)
    }

    async fn packages(&self) -> Result<Vec<String>> {
        let response = self.value(Request::Packages).await?;
        expect_response!(self, response, Response::Strings)
    }

    async fn distributions_for_package(&self, name: &str) -> Result<Vec<Distribution>> {
        let response = self
            .value(Request::DistributionsForPackage { name: name.to_string() })
            .await?;
        expect_response!(self, response, Response::Distributions)
    }

    async fn resolve_path(&self, path: &Path) -> Result<Vec<Symbol>> {
        let response = self.value(Request::ResolvePath { path: path.clone() }).await?;
        expect_response!(self, response, Response::Symbols)
    }

    async fn resolve_symbol(&self, path: &Path) -> Result<Symbol> {
        let response = self.value(Request::ResolveSymbol { path: path.clone() }).await?;
        expect_response!(self, response, Response::Symbol)
    }

    async fn new_symbol(&self, dist: &Distribution, path: &Path) -> Result<Symbol> {
        let response = self
            .value(Request::NewSymbol {
                dist: dist.clone(),
                path: path.clone(),
            })
            .await?;
        expect_response!(self, response, Response::Symbol)
    }

    async fn child_symbol(&self, symbol: &Symbol, name: &str) -> Result<Symbol> {
        let response = self
            .value(Request::ChildSymbol {
                symbol: symbol.clone(),
                name: name.to_string(),
            })
            .await?;
        expect_response!(self, response, Response::Symbol)
    }

    async fn kind(&self, symbol: &Symbol) -> Result<Kind> {
        let response = self.value(Request::Kind { symbol: symbol.clone() }).await?;
        expect_response!(self, response, Response::Kind)
    }

    async fn symbol_type(&self, symbol: &Symbol) -> Result<Symbol> {
        let response = self.value(Request::SymbolType { symbol: symbol.clone() }).await?;
        expect_response!(self, response, Response::Symbol)
    }

    async fn bases(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        let response = self.value(Request::Bases { symbol: symbol.clone() }).await?;
        expect_response!(self, response, Response::Symbols)
    }

    async fn children(&self, symbol: &Symbol) -> Result<Vec<String>> {
        let response = self.value(Request::Children { symbol: symbol.clone() }).await?;
        expect_response!(self, response, Response::Strings)
    }

    async fn canonical_symbols(&self, dist: &Distribution) -> Result<Vec<Symbol>> {
        let response = self
            .value(Request::CanonicalSymbols { dist: dist.clone() })
            .await?;
        expect_response!(self, response, Response::Symbols)
    }

    async fn top_levels(&self, dist: &Distribution) -> Result<Vec<String>> {
        let response = self.value(Request::TopLevels { dist: dist.clone() }).await?;
        expect_response!(self, response, Response::Strings)
    }

    async fn documentation(&self, symbol: &Symbol) -> Result<Option<Documentation>> {
        self.call(Request::Documentation { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::Documentation))
            .transpose()
    }

    async fn symbol_counts(&self, symbol: &Symbol) -> Result<Option<SymbolCounts>> {
        self.call(Request::SymbolCounts { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::SymbolCounts))
            .transpose()
    }

    async fn arg_spec(&self, symbol: &Symbol) -> Result<Option<ArgSpec>> {
        self.call(Request::ArgSpec { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::ArgSpec))
            .transpose()
    }

    async fn signatures(&self, symbol: &Symbol) -> Result<Option<Vec<Signature>>> {
        self.call(Request::Signatures { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::Signatures))
            .transpose()
    }

    async fn sig_stats(&self, symbol: &Symbol) -> Result<Option<SigStats>> {
        self.call(Request::SigStats { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::SigStats))
            .transpose()
    }

    async fn kwargs(&self, symbol: &Symbol) -> Result<Option<KeywordArgs>> {
        self.call(Request::Kwargs { symbol: symbol.clone() })
            .await?
            .map(|r| expect_response!(self, r, Response::Kwargs))
            .transpose()
    }

    async fn keyword_arg_frequency(&self, symbol: &Symbol, arg: &str) -> Result<Option<u64>> {
        self.call(Request::KeywordArgFrequency {
            symbol: symbol.clone(),
            arg: arg.to_string(),
        })
        .await?
        .map(|r| expect_response!(self, r, Response::Count))
        .transpose()
    }

    async fn num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.call(Request::NumArgsFrequency {
            symbol: symbol.clone(),
            num_args,
        })
        .await?
        .map(|r| expect_response!(self, r, Response::Frequency))
        .transpose()
    }

    async fn cumulative_num_args_frequency(&self, symbol: &Symbol, num_args: usize) -> Result<Option<f64>> {
        self.call(Request::CumulativeNumArgsFrequency {
            symbol: symbol.clone(),
            num_args,
        })
        .await?
        .map(|r| expect_response!(self, r, Response::Frequency))
        .transpose()
    }

    async fn return_types(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        let response = self.value(Request::ReturnTypes { symbol: symbol.clone() }).await?;
        expect_response!(self, response, Response::Symbols)
    }

    async fn truthy_return_types(&self, symbol: &Symbol) -> Result<Vec<TruthySymbol>> {
        let response = self
            .value(Request::TruthyReturnTypes { symbol: symbol.clone() })
            .await?;
        expect_response!(self, response, Response::TruthySymbols)
    }

    async fn reset(&self) -> Result<()> {
        match self.value(Request::Reset).await? {
            Response::Unit => Ok(()),
            other => Err(self.unexpected(&other)),
        }
    }

    /// Drops the connection; the served manager stays open.
    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
