//! Sessions: one multiplexed connection to a single peer.
//!
//! # State Machine
//!
//! ```text
//! Created -> Active -> Broken -> Closed
//!               \_________________^
//! ```
//!
//! `Broken` is entered when the multiplexer reports its connection gone or
//! an I/O operation on one of the session's streams failed. `Closed` is
//! terminal. A session is never revived; the pool replaces it instead.

use crate::dialer::Connection;
use corelib::NodeId;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use streaming::{MuxConfig, MuxSession, MuxStream, StreamingError};
use tracing::debug;

/// Liveness state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Active = 1,
    Broken = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Active,
            2 => SessionState::Broken,
            _ => SessionState::Closed,
        }
    }
}

/// A multiplexed transport bound to one peer.
pub struct Session {
    peer: NodeId,
    mux: MuxSession,
    state: AtomicU8,
    created_at: Instant,
}

impl Session {
    /// Wrap the dialing end of an established connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<C: Connection>(peer: NodeId, conn: C, config: MuxConfig) -> Self {
        let session = Self {
            peer,
            mux: MuxSession::client(conn, config),
            state: AtomicU8::new(SessionState::Created as u8),
            created_at: Instant::now(),
        };
        session.transition(SessionState::Created, SessionState::Active);
        session
    }

    pub fn peer(&self) -> &NodeId {
        &self.peer
    }

    /// Current state. Observes multiplexer failure lazily.
    pub fn state(&self) -> SessionState {
        let state = SessionState::from_u8(self.state.load(Ordering::Acquire));
        if state == SessionState::Active && self.mux.is_closed() {
            self.transition(SessionState::Active, SessionState::Broken);
            return SessionState::from_u8(self.state.load(Ordering::Acquire));
        }
        state
    }

    /// True once the session can no longer serve streams.
    pub fn is_broken(&self) -> bool {
        !matches!(self.state(), SessionState::Created | SessionState::Active)
    }

    /// Open a stream for one call.
    ///
    /// A refusal only breaks the session if the multiplexer has lost its
    /// connection; refusals of a single stream leave it active.
    pub async fn open_stream(&self) -> Result<MuxStream, StreamingError> {
        if self.is_broken() {
            return Err(StreamingError::SessionClosed);
        }
        self.mux.open_stream().await.map_err(|err| {
            if self.mux.is_closed() {
                self.mark_broken();
            }
            err
        })
    }

    /// Decide whether a failed stream took the whole session down.
    ///
    /// A stream can see its connection end slightly before the multiplexer
    /// reports it, so this waits up to `grace` for that report. Returns
    /// `false` when the session outlives the grace period: the failure was
    /// confined to the stream.
    pub async fn confirm_broken(&self, grace: Duration) -> bool {
        if !self.is_broken() && tokio::time::timeout(grace, self.mux.closed()).await.is_ok() {
            self.mark_broken();
        }
        self.is_broken()
    }

    /// Record that an I/O operation on this session failed.
    pub fn mark_broken(&self) {
        if self.transition(SessionState::Active, SessionState::Broken) {
            debug!(peer = %self.peer, "session marked broken");
        }
    }

    /// Tear down the multiplexer and its connection. Idempotent.
    pub fn close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous != SessionState::Closed as u8 {
            debug!(peer = %self.peer, "closing session");
        }
        self.mux.close();
    }

    /// Streams currently open on this session.
    pub fn num_streams(&self) -> usize {
        self.mux.num_streams()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("streams", &self.num_streams())
            .field("age", &self.age())
            .finish()
    }
}
