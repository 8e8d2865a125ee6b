//! Serving side: dispatch `"<Service>.<Method>"` names to handlers.
//!
//! Method names are plain map keys here; the string only identifies the
//! method on the wire.

use crate::codec::{self, RequestFrame, ResponseFrame};
use crate::dialer::Connection;
use crate::error::{Result, RpcError};
use crate::method::MethodName;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use streaming::{MuxConfig, MuxSession, MuxStream};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handles one method.
///
/// Receives the encoded request payload and returns the encoded response
/// payload, or an error message that is sent back to the caller verbatim.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, body: Vec<u8>) -> std::result::Result<Vec<u8>, String>;
}

/// Adapts a typed async function into a [`Handler`].
struct FnHandler<F, Req, Resp> {
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<F, Fut, Req, Resp> Handler for FnHandler<F, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Resp, String>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    async fn call(&self, body: Vec<u8>) -> std::result::Result<Vec<u8>, String> {
        let req: Req = codec::decode(&body).map_err(|e| format!("malformed request: {}", e))?;
        let resp = (self.f)(req).await?;
        codec::encode(&resp)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| format!("cannot encode response: {}", e))
    }
}

/// Registry of method handlers.
#[derive(Clone, Default)]
pub struct ServiceMap {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`.
    ///
    /// Fails if the name is not `"<Service>.<Method>"` or is already taken.
    pub fn register<H: Handler>(&mut self, method: &str, handler: H) -> Result<()> {
        let name = MethodName::parse(method)?;
        if self.handlers.contains_key(name.as_str()) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }
        self.handlers.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Register a typed async function under `method`.
    pub fn register_fn<F, Fut, Req, Resp>(&mut self, method: &str, f: F) -> Result<()>
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, String>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        self.register(
            method,
            FnHandler {
                f,
                _marker: PhantomData,
            },
        )
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler named by `request` and wrap its outcome.
    pub async fn dispatch(&self, request: RequestFrame) -> ResponseFrame {
        let Some(handler) = self.get(&request.method) else {
            debug!(method = %request.method, "unknown method");
            return ResponseFrame::err(format!("unknown method {}", request.method));
        };
        match handler.call(request.body).await {
            Ok(body) => ResponseFrame::ok(body),
            Err(message) => ResponseFrame::err(message),
        }
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap")
            .field("methods", &self.methods())
            .finish()
    }
}

/// RPC server: one multiplexed session per accepted connection, one task per
/// accepted stream.
#[derive(Clone, Debug)]
pub struct Server {
    services: Arc<ServiceMap>,
    mux: MuxConfig,
}

impl Server {
    pub fn new(services: ServiceMap) -> Self {
        Self {
            services: Arc::new(services),
            mux: MuxConfig::default(),
        }
    }

    /// Set multiplexer configuration for accepted sessions.
    pub fn with_mux_config(mut self, config: MuxConfig) -> Self {
        self.mux = config;
        self
    }

    pub fn services(&self) -> &ServiceMap {
        &self.services
    }

    /// Bind `addr` and serve in a background task.
    pub async fn spawn(self, addr: &str) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { self.serve(listener, shutdown).await }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Cancelling `shutdown` also closes every session accepted so far.
    #[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        info!("RPC server listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((conn, remote)) => {
                        debug!(remote = %remote, "accepted connection");
                        if let Err(err) = conn.set_nodelay(true) {
                            debug!(error = %err, "cannot set TCP_NODELAY");
                        }
                        let server = self.clone();
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move { server.serve_connection(conn, shutdown).await });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                _ = shutdown.cancelled() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }
    }

    /// Serve calls arriving over one connection until the peer disconnects
    /// or `shutdown` fires.
    pub async fn serve_connection<C: Connection>(&self, conn: C, shutdown: CancellationToken) {
        let session = MuxSession::server(conn, self.mux.clone());
        loop {
            let stream = tokio::select! {
                stream = session.accept() => stream,
                _ = shutdown.cancelled() => None,
            };
            let Some(stream) = stream else { break };

            let services = Arc::clone(&self.services);
            tokio::spawn(async move {
                if let Err(err) = serve_stream(&services, stream).await {
                    debug!(error = %err, "call stream failed");
                }
            });
        }
        session.close();
        debug!("connection closed");
    }
}

async fn serve_stream(services: &ServiceMap, stream: MuxStream) -> io::Result<()> {
    let mut framed = codec::framed(stream);
    let Some(frame) = framed.next().await else {
        return Ok(());
    };
    let frame = frame?;

    let response = match codec::decode::<RequestFrame>(&frame) {
        Ok(request) => services.dispatch(request).await,
        Err(err) => ResponseFrame::err(format!("malformed request frame: {}", err)),
    };
    let bytes: Bytes = codec::encode(&response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    framed.send(bytes).await?;
    framed.get_mut().shutdown().await
}

/// Handle to a server started with [`Server::spawn`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the server (and its sessions) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, close all sessions and wait for the accept loop.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "server task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<T: Serialize + ?Sized>(method: &str, body: &T) -> RequestFrame {
        RequestFrame {
            method: method.to_string(),
            body: codec::encode(body).unwrap().to_vec(),
        }
    }

    #[test]
    fn test_register_rejects_bad_and_duplicate_names() {
        let mut services = ServiceMap::new();
        services
            .register_fn("DHT.Ping", |n: u32| async move { Ok::<_, String>(n) })
            .unwrap();

        assert!(matches!(
            services.register_fn("Ping", |n: u32| async move { Ok::<_, String>(n) }),
            Err(RpcError::InvalidMethod(_))
        ));
        assert!(matches!(
            services.register_fn("DHT.Ping", |n: u32| async move { Ok::<_, String>(n) }),
            Err(RpcError::DuplicateMethod(_))
        ));
        assert_eq!(services.methods(), vec!["DHT.Ping"]);
    }

    #[tokio::test]
    async fn test_dispatch_typed_handler() {
        let mut services = ServiceMap::new();
        services
            .register_fn("Math.Double", |n: u64| async move { Ok::<_, String>(n * 2) })
            .unwrap();

        let response = services.dispatch(request("Math.Double", &21u64)).await;
        assert_eq!(response.error, None);
        assert_eq!(codec::decode::<u64>(&response.body).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let services = ServiceMap::new();
        let response = services.dispatch(request("DHT.Nope", &())).await;
        assert_eq!(response.error.as_deref(), Some("unknown method DHT.Nope"));
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_and_bad_payload() {
        let mut services = ServiceMap::new();
        services
            .register_fn("Test.Fail", |_: String| async move { Err::<(), _>("boom".to_string()) })
            .unwrap();

        let failed = services.dispatch(request("Test.Fail", "x")).await;
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let malformed = services
            .dispatch(RequestFrame {
                method: "Test.Fail".to_string(),
                body: vec![0xff],
            })
            .await;
        assert!(malformed.error.unwrap().starts_with("malformed request"));
    }
}
