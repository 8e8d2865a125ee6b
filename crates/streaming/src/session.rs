//! Multiplexed session over a single connection.
//!
//! A [`MuxSession`] hands its connection to a background driver task that
//! owns the `yamux::Connection`. The handle talks to the driver through
//! channels: open requests go in, accepted streams come out. When the
//! connection fails or is closed locally, the driver exits and the session
//! reports itself closed.

use crate::config::MuxConfig;
use crate::error::{Result, StreamingError};
use crate::stream::MuxStream;
use futures::future::poll_fn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, trace};

/// Upper bound on flushing the goodbye to the peer during a local close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type OpenReply = oneshot::Sender<std::result::Result<yamux::Stream, yamux::ConnectionError>>;

/// Which end of the connection a session sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialing side. Streams opened by the peer are refused.
    Client,
    /// Accepting side. Streams opened by the peer are handed to `accept`.
    Server,
}

impl Role {
    fn mode(self) -> yamux::Mode {
        match self {
            Role::Client => yamux::Mode::Client,
            Role::Server => yamux::Mode::Server,
        }
    }
}

/// A multiplexed session bound to one connection.
pub struct MuxSession {
    role: Role,
    open_tx: mpsc::Sender<OpenReply>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<yamux::Stream>>,
    permits: Arc<Semaphore>,
    open_streams: Arc<AtomicUsize>,
    /// Cancelled when a local close is requested.
    shutdown: CancellationToken,
    /// Cancelled once the driver has let go of the connection.
    closed: CancellationToken,
}

impl MuxSession {
    /// Wrap the dialing end of a connection.
    ///
    /// Must be called from within a Tokio runtime: the session spawns its
    /// driver task immediately.
    pub fn client<C>(conn: C, config: MuxConfig) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(conn, config, Role::Client)
    }

    /// Wrap the accepting end of a connection.
    pub fn server<C>(conn: C, config: MuxConfig) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(conn, config, Role::Server)
    }

    fn new<C>(conn: C, config: MuxConfig, role: Role) -> Self
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connection = yamux::Connection::new(conn.compat(), config.yamux_config(), role.mode());
        let (open_tx, open_rx) = mpsc::channel(config.accept_backlog);
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        let driver = Driver {
            connection,
            role,
            open_rx,
            pending_open: None,
            accept_tx: PollSender::new(accept_tx),
            pending_accept: None,
        };
        tokio::spawn(driver.run(shutdown.clone(), closed.clone()));

        Self {
            role,
            open_tx,
            incoming: tokio::sync::Mutex::new(accept_rx),
            permits: Arc::new(Semaphore::new(config.max_streams)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            shutdown,
            closed,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Open a new outbound stream.
    ///
    /// Waits while `max_streams` streams opened by this side are still
    /// alive. Safe to call concurrently.
    pub async fn open_stream(&self) -> Result<MuxStream> {
        if self.is_closed() {
            return Err(StreamingError::SessionClosed);
        }

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| StreamingError::SessionClosed)?
            }
            _ = self.closed.cancelled() => return Err(StreamingError::SessionClosed),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.open_tx
            .send(reply_tx)
            .await
            .map_err(|_| StreamingError::SessionClosed)?;
        let stream = reply_rx.await.map_err(|_| StreamingError::SessionClosed)??;

        trace!(stream_id = %stream.id(), "opened stream");
        Ok(MuxStream::new(
            stream,
            Some(permit),
            Arc::clone(&self.open_streams),
            self.closed.clone(),
        ))
    }

    /// Wait for the peer to open a stream.
    ///
    /// Returns `None` once the session is closed. Client sessions never
    /// yield streams.
    pub async fn accept(&self) -> Option<MuxStream> {
        let mut incoming = self.incoming.lock().await;
        let stream = tokio::select! {
            stream = incoming.recv() => stream?,
            _ = self.shutdown.cancelled() => return None,
        };
        Some(MuxStream::new(
            stream,
            None,
            Arc::clone(&self.open_streams),
            self.closed.clone(),
        ))
    }

    /// Tear down the session and its connection. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(role = ?self.role, "closing multiplexed session");
        }
        self.shutdown.cancel();
    }

    /// True once the session was closed locally or its connection ended.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.closed.is_cancelled()
    }

    /// Resolves once the connection has been released, whether by a local
    /// close, the peer or an I/O failure.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Number of currently open streams, in either direction.
    pub fn num_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MuxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxSession")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .field("streams", &self.num_streams())
            .finish()
    }
}

/// Sole owner of the `yamux::Connection`.
struct Driver<C> {
    connection: yamux::Connection<Compat<C>>,
    role: Role,
    open_rx: mpsc::Receiver<OpenReply>,
    pending_open: Option<OpenReply>,
    accept_tx: PollSender<yamux::Stream>,
    pending_accept: Option<yamux::Stream>,
}

impl<C> Driver<C>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn run(mut self, shutdown: CancellationToken, closed: CancellationToken) {
        let outcome = tokio::select! {
            outcome = poll_fn(|cx| self.poll_drive(cx)) => Some(outcome),
            _ = shutdown.cancelled() => None,
        };

        match outcome {
            Some(Ok(())) => debug!("connection closed by peer"),
            Some(Err(err)) => debug!(error = %err, "multiplexed connection failed"),
            None => {
                let closing = poll_fn(|cx| self.connection.poll_close(cx));
                match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
                    Ok(Ok(())) => debug!("multiplexed session closed"),
                    Ok(Err(err)) => debug!(error = %err, "error while closing session"),
                    Err(_) => debug!("timed out closing session"),
                }
            }
        }

        drop(self);
        closed.cancel();
    }

    /// Drive the connection until it ends.
    ///
    /// yamux only makes I/O progress while `poll_next_inbound` is polled, so
    /// every wakeup polls it unless an accepted stream is still waiting for
    /// room in the accept queue.
    fn poll_drive(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), yamux::ConnectionError>> {
        loop {
            let mut progress = false;

            if let Some(stream) = self.pending_accept.take() {
                match self.accept_tx.poll_reserve(cx) {
                    Poll::Ready(Ok(())) => {
                        let _ = self.accept_tx.send_item(stream);
                        progress = true;
                    }
                    Poll::Ready(Err(_)) => {
                        trace!("accept queue gone, dropping inbound stream");
                        progress = true;
                    }
                    Poll::Pending => self.pending_accept = Some(stream),
                }
            }

            if self.pending_accept.is_none() {
                match self.connection.poll_next_inbound(cx) {
                    Poll::Ready(Some(Ok(stream))) => {
                        progress = true;
                        match self.role {
                            Role::Server => self.pending_accept = Some(stream),
                            Role::Client => {
                                trace!(stream_id = %stream.id(), "refusing inbound stream")
                            }
                        }
                    }
                    Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                    Poll::Ready(None) => return Poll::Ready(Ok(())),
                    Poll::Pending => {}
                }
            }

            if self.pending_open.is_none() {
                if let Poll::Ready(Some(reply)) = self.open_rx.poll_recv(cx) {
                    self.pending_open = Some(reply);
                }
            }
            if let Some(reply) = self.pending_open.take() {
                if reply.is_closed() {
                    // requester gave up
                    progress = true;
                } else {
                    match self.connection.poll_new_outbound(cx) {
                        Poll::Ready(result) => {
                            let _ = reply.send(result);
                            progress = true;
                        }
                        Poll::Pending => self.pending_open = Some(reply),
                    }
                }
            }

            if !progress {
                return Poll::Pending;
            }
        }
    }
}
