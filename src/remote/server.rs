use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::{Result, ResourceError};
use crate::core::manager::Manager;
use crate::remote::protocol::{
    self, Envelope, EnvelopeId, Reply, ReplyEnvelope, Request, Response, WireError,
};

/// Serves a manager to remote clients over TCP
pub struct RpcServer {
    listener: TcpListener,
    manager: Arc<dyn Manager>,
    shutdown: CancellationToken,
}

impl RpcServer {
    pub async fn bind(addr: &str, manager: Arc<dyn Manager>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            manager,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token stops the accept loop and every connection
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shut down
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "serving {}", protocol::SERVICE_NAME);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("rpc server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "accepted connection");
                    let manager = Arc::clone(&self.manager);
                    let shutdown = self.shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, manager, shutdown).await {
                            warn!(peer = %peer, error = %e, "connection failed");
                        }
                        debug!(peer = %peer, "connection closed");
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    manager: Arc<dyn Manager>,
    shutdown: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut sink, mut frames) = Framed::new(stream, protocol::codec()).split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(frame) => frame?,
                None => break,
            },
        };

        let envelope: Envelope = match protocol::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                reject(&frame, &e, &tx);
                continue;
            }
        };

        let manager = Arc::clone(&manager);
        let tx = tx.clone();
        tokio::spawn(async move {
            let Envelope { id, call } = envelope;
            let procedure = call.procedure();
            let reply = protocol::to_reply(dispatch(manager.as_ref(), call).await);
            match protocol::encode(&ReplyEnvelope { id, reply }) {
                // the connection may already be gone
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => warn!(procedure = %procedure, error = %e, "could not encode reply"),
            }
        });
    }

    drop(tx);
    // let in-flight replies drain
    let _ = writer.await;
    Ok(())
}

/// Answer a request whose call could not be decoded, when its id still can be
fn reject(frame: &[u8], error: &ResourceError, tx: &mpsc::UnboundedSender<Bytes>) {
    let Ok(EnvelopeId { id }) = protocol::decode::<EnvelopeId>(frame) else {
        warn!(error = %error, "dropping malformed request");
        return;
    };
    warn!(id, error = %error, "rejecting malformed request");
    let reply = Reply::Error(WireError::Serialization(error.to_string()));
    match protocol::encode(&ReplyEnvelope { id, reply }) {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => warn!(id, error = %e, "failed to encode rejection"),
    }
}

/// Run one request against the manager. `Ok(None)` means "no value".
async fn dispatch(manager: &dyn Manager, call: Request) -> Result<Option<Response>> {
    let response = match call {
        Request::Distributions => Response::Distributions(manager.distributions().await?),
        Request::DistributionLoaded { dist } => {
            Response::Bool(manager.distribution_loaded(&dist).await?)
        }
        Request::Packages => Response::Strings(manager.packages().await?),
        Request::DistributionsForPackage { name } => {
            Response::Distributions(manager.distributions_for_package(&name).await?)
        }
        Request::ResolvePath { path } => Response::Symbols(manager.resolve_path(&path).await?),
        Request::ResolveSymbol { path } => Response::Symbol(manager.resolve_symbol(&path).await?),
        Request::NewSymbol { dist, path } => {
            Response::Symbol(manager.new_symbol(&dist, &path).await?)
        }
        Request::ChildSymbol { symbol, name } => {
            Response::Symbol(manager.child_symbol(&symbol, &name).await?)
        }
        Request::Kind { symbol } => Response::Kind(manager.kind(&symbol).await?),
        Request::SymbolType { symbol } => Response::Symbol(manager.symbol_type(&symbol).await?),
        Request::Bases { symbol } => Response::Symbols(manager.bases(&symbol).await?),
        Request::Children { symbol } => Response::Strings(manager.children(&symbol).await?),
        Request::CanonicalSymbols { dist } => {
            Response::Symbols(manager.canonical_symbols(&dist).await?)
        }
        Request::TopLevels { dist } => Response::Strings(manager.top_levels(&dist).await?),
        Request::Documentation { symbol } => {
            return Ok(manager.documentation(&symbol).await?.map(Response::Documentation));
        }
        Request::SymbolCounts { symbol } => {
            return Ok(manager.symbol_counts(&symbol).await?.map(Response::SymbolCounts));
        }
        Request::ArgSpec { symbol } => {
            return Ok(manager.arg_spec(&symbol).await?.map(Response::ArgSpec));
        }
        Request::Signatures { symbol } => {
            return Ok(manager.signatures(&symbol).await?.map(Response::Signatures));
        }
        Request::SigStats { symbol } => {
            return Ok(manager.sig_stats(&symbol).await?.map(Response::SigStats));
        }
        Request::Kwargs { symbol } => {
            return Ok(manager.kwargs(&symbol).await?.map(Response::Kwargs));
        }
        Request::KeywordArgFrequency { symbol, arg } => {
            return Ok(manager
                .keyword_arg_frequency(&symbol, &arg)
                .await?
                .map(Response::Count));
        }
        Request::NumArgsFrequency { symbol, num_args } => {
            return Ok(manager
                .num_args_frequency(&symbol, num_args)
                .await?
                .map(Response::Frequency));
        }
        Request::CumulativeNumArgsFrequency { symbol, num_args } => {
            return Ok(manager
                .cumulative_num_args_frequency(&symbol, num_args)
                .await?
                .map(Response::Frequency));
        }
        Request::ReturnTypes { symbol } => Response::Symbols(manager.return_types(&symbol).await?),
        Request::TruthyReturnTypes { symbol } => {
            Response::TruthySymbols(manager.truthy_return_types(&symbol).await?)
        }
        Request::Reset => {
            manager.reset().await?;
            Response::Unit
        }
    };
    Ok(Some(response))
}
