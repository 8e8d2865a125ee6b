//! Dialers: mapping a peer identity to a raw connection.

use crate::config::DialerConfig;
use crate::error::DialError;
use async_trait::async_trait;
use corelib::{NodeId, NodeResolver};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// A raw, ordered, bidirectional byte connection.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection returned by dialers.
pub type BoxConnection = Box<dyn Connection>;

/// Produces raw connections to peers.
///
/// # Thread Safety
///
/// A single dialer is shared by every concurrent pool operation, so
/// implementations must be `Send + Sync`.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connect to `peer`.
    async fn dial(&self, peer: &NodeId) -> Result<BoxConnection, DialError>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    async fn dial(&self, peer: &NodeId) -> Result<BoxConnection, DialError> {
        (**self).dial(peer).await
    }
}

/// Dialer backed by an async closure; see [`dial_fn`].
pub struct DialFn<F>(F);

/// Adapt an async closure `NodeId -> io::Result<C>` into a [`Dialer`].
///
/// ```no_run
/// use rpc::{dial_fn, SessionPool};
/// use tokio::net::TcpStream;
///
/// let pool = SessionPool::new(dial_fn(|peer| async move {
///     TcpStream::connect(peer.as_str()).await
/// }));
/// ```
pub fn dial_fn<F, Fut, C>(f: F) -> DialFn<F>
where
    F: Fn(NodeId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<C>> + Send + 'static,
    C: Connection,
{
    DialFn(f)
}

#[async_trait]
impl<F, Fut, C> Dialer for DialFn<F>
where
    F: Fn(NodeId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<C>> + Send + 'static,
    C: Connection,
{
    async fn dial(&self, peer: &NodeId) -> Result<BoxConnection, DialError> {
        let conn = (self.0)(peer.clone()).await?;
        Ok(Box::new(conn))
    }
}

/// Default dialer: resolve the peer's address, then connect over TCP.
pub struct TcpDialer {
    resolver: Arc<dyn NodeResolver>,
    config: DialerConfig,
}

impl TcpDialer {
    pub fn new(resolver: Arc<dyn NodeResolver>) -> Self {
        Self {
            resolver,
            config: DialerConfig::default(),
        }
    }

    /// Set dialer configuration.
    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    #[instrument(skip_all, fields(peer = %peer))]
    async fn dial(&self, peer: &NodeId) -> Result<BoxConnection, DialError> {
        let node = self.resolver.resolve(peer)?;
        let timeout = self.config.connect_timeout;

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&node.addr))
            .await
            .map_err(|_| DialError::Timeout(timeout))??;
        stream.set_nodelay(self.config.nodelay)?;

        debug!(addr = %node.addr, "connected to node");
        Ok(Box::new(stream))
    }
}
