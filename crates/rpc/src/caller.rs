//! Caller: one request/response RPC per call over pooled sessions.

use crate::codec::{self, RequestFrame, ResponseFrame};
use crate::error::{Result, RpcError};
use crate::method::MethodName;
use crate::pool::SessionPool;
use crate::session::Session;
use bytes::Bytes;
use corelib::NodeId;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Failed attempt, remembering the cached session to blame if a retry is
/// allowed.
struct AttemptError {
    error: RpcError,
    stale: Option<Arc<Session>>,
}

impl From<RpcError> for AttemptError {
    fn from(error: RpcError) -> Self {
        Self { error, stale: None }
    }
}

/// Stateless RPC façade over a [`SessionPool`].
///
/// Cheap to clone; all clones share the same pool.
#[derive(Clone, Debug)]
pub struct Caller {
    pool: Arc<SessionPool>,
}

impl Default for Caller {
    fn default() -> Self {
        Self::new()
    }
}

impl Caller {
    /// Caller bound to the process-wide pool.
    pub fn new() -> Self {
        Self::with_pool(SessionPool::instance())
    }

    /// Caller bound to an explicit pool.
    pub fn with_pool(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Call `method` on `peer` and decode its response.
    ///
    /// A transport failure that broke an already cached session evicts that
    /// session and retries the call once on a freshly dialed one. Failures of
    /// the retry, failures on a newly dialed session, failures confined to a
    /// single stream, and errors reported by the remote handler are returned
    /// as is.
    #[instrument(skip_all, fields(peer = %peer, method = method))]
    pub async fn call_node<Req, Resp>(&self, peer: &NodeId, method: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        MethodName::parse(method)?;
        let encode_err = |source| RpcError::Encode {
            peer: peer.clone(),
            method: method.to_string(),
            source,
        };
        let request = codec::encode(&RequestFrame {
            method: method.to_string(),
            body: codec::encode(req).map_err(encode_err)?.to_vec(),
        })
        .map_err(encode_err)?;

        counter!("rpc_calls_total", "method" => method.to_string()).increment(1);

        let reply = match self.round_trip(peer, method, request.clone()).await {
            Ok(reply) => reply,
            Err(AttemptError {
                error,
                stale: Some(session),
            }) => {
                warn!(error = %error, "call over cached session failed, retrying");
                counter!("rpc_call_retries_total").increment(1);
                self.pool.evict(peer, &session);
                self.round_trip(peer, method, request)
                    .await
                    .map_err(|attempt| attempt.error)?
            }
            Err(attempt) => return Err(attempt.error),
        };

        let decode_err = |source| RpcError::Decode {
            peer: peer.clone(),
            method: method.to_string(),
            source,
        };
        let response: ResponseFrame = codec::decode(&reply).map_err(decode_err)?;
        if let Some(message) = response.error {
            debug!(message = %message, "remote returned error");
            return Err(RpcError::Remote {
                peer: peer.clone(),
                method: method.to_string(),
                message,
            });
        }
        codec::decode(&response.body).map_err(decode_err)
    }

    /// One request/response exchange over a fresh stream.
    async fn round_trip(
        &self,
        peer: &NodeId,
        method: &str,
        request: Bytes,
    ) -> std::result::Result<Bytes, AttemptError> {
        let checkout = self.pool.checkout(peer).await?;
        let mut framed = codec::framed(checkout.stream);

        let exchange = async {
            framed.send(request).await?;
            framed.get_mut().shutdown().await?;
            let frame = framed.next().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended before response")
            })??;
            Ok::<_, io::Error>(frame.freeze())
        };
        let source = match exchange.await {
            Ok(reply) => return Ok(reply),
            Err(source) => source,
        };
        drop(framed);

        // only a dead link justifies eviction; a failure confined to this
        // stream leaves the session serving other calls
        let broken = checkout
            .session
            .confirm_broken(self.pool.config().failure_grace)
            .await;
        let error = RpcError::Transport {
            peer: peer.clone(),
            method: method.to_string(),
            source,
        };
        if !broken {
            debug!(error = %error, "stream failed on a live session");
        }
        Err(AttemptError {
            error,
            stale: (broken && !checkout.fresh).then(|| Arc::clone(&checkout.session)),
        })
    }
}
