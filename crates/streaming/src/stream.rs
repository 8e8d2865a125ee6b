//! Logical streams carved out of a multiplexed session.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use yamux::StreamId;

/// One bidirectional byte channel inside a [`MuxSession`](crate::MuxSession).
///
/// `shutdown` half-closes the stream so the peer reads end of stream.
/// Writes wait for the peer's receive window. Once the session is gone, reads
/// end and writes fail; [`MuxStream::is_session_closed`] tells the two
/// apart from a clean close by the peer.
pub struct MuxStream {
    inner: Compat<yamux::Stream>,
    _permit: Option<OwnedSemaphorePermit>,
    open_streams: Arc<AtomicUsize>,
    session_closed: CancellationToken,
}

impl MuxStream {
    pub(crate) fn new(
        stream: yamux::Stream,
        permit: Option<OwnedSemaphorePermit>,
        open_streams: Arc<AtomicUsize>,
        session_closed: CancellationToken,
    ) -> Self {
        open_streams.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: stream.compat(),
            _permit: permit,
            open_streams,
            session_closed,
        }
    }

    /// Stream id within its session.
    pub fn id(&self) -> StreamId {
        self.inner.get_ref().id()
    }

    /// True if the owning session has released its connection.
    pub fn is_session_closed(&self) -> bool {
        self.session_closed.is_cancelled()
    }
}

impl std::fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxStream")
            .field("id", &self.id())
            .field("session_closed", &self.is_session_closed())
            .finish()
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::AcqRel);
    }
}
