//! Error types for the multiplexer.

use std::io;
use thiserror::Error;

/// Errors raised by multiplexed sessions.
#[derive(Debug, Error)]
pub enum StreamingError {
    /// IO error on the underlying connection.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The session (or its connection) is no longer usable.
    #[error("Session closed")]
    SessionClosed,

    /// The multiplexer refuses to open more concurrent streams.
    #[error("Too many open streams")]
    TooManyStreams,

    /// The peer sent something the protocol does not allow, or stream ids
    /// ran out.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl StreamingError {
    /// True when the error means the whole session is gone, as opposed to a
    /// refusal that leaves the session usable.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, StreamingError::SessionClosed | StreamingError::Io(_))
    }
}

impl From<yamux::ConnectionError> for StreamingError {
    fn from(err: yamux::ConnectionError) -> Self {
        match err {
            yamux::ConnectionError::Io(e) => StreamingError::Io(e),
            yamux::ConnectionError::Closed => StreamingError::SessionClosed,
            yamux::ConnectionError::TooManyStreams => StreamingError::TooManyStreams,
            other => StreamingError::Protocol(other.to_string()),
        }
    }
}

impl From<StreamingError> for io::Error {
    fn from(err: StreamingError) -> Self {
        match err {
            StreamingError::Io(e) => e,
            StreamingError::SessionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "multiplexed session closed")
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Result type for multiplexer operations.
pub type Result<T> = std::result::Result<T, StreamingError>;
