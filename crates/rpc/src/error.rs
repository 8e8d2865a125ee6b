//! Error types for the RPC layer.
//!
//! Every variant carries the peer it concerns (and the method, for call
//! errors) so callers can log or react without extra context.

use corelib::NodeId;
use std::io;
use std::time::Duration;
use streaming::StreamingError;
use thiserror::Error;

/// Failure to produce a raw connection to a peer.
#[derive(Debug, Error)]
pub enum DialError {
    /// The identity/routing collaborator could not resolve the peer.
    #[error("cannot resolve node: {0}")]
    Resolve(#[from] corelib::Error),

    /// Connecting took longer than the configured timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// IO error while connecting.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of [`RpcError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer could not be reached.
    DialFailure,
    /// The session was unusable when the call needed it.
    SessionBroken,
    /// The multiplexer refused a new stream.
    StreamOpenFailure,
    /// The request could not be serialized.
    EncodeFailure,
    /// The response could not be deserialized.
    DecodeFailure,
    /// The peer handled the call and reported a failure.
    RemoteError,
    /// Stream I/O failed mid-call.
    TransportFailure,
    /// The method name is malformed or already registered.
    InvalidMethod,
}

/// Errors returned by the pool, the caller and the server registry.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("dial {peer} failed: {source}")]
    Dial {
        peer: NodeId,
        #[source]
        source: DialError,
    },

    #[error("session to {peer} is broken")]
    SessionBroken { peer: NodeId },

    #[error("open stream to {peer} failed: {source}")]
    StreamOpen {
        peer: NodeId,
        #[source]
        source: StreamingError,
    },

    #[error("encode {method} request for {peer} failed: {source}")]
    Encode {
        peer: NodeId,
        method: String,
        #[source]
        source: bincode::Error,
    },

    #[error("decode {method} response from {peer} failed: {source}")]
    Decode {
        peer: NodeId,
        method: String,
        #[source]
        source: bincode::Error,
    },

    #[error("calling {method} on {peer} failed: {source}")]
    Transport {
        peer: NodeId,
        method: String,
        #[source]
        source: io::Error,
    },

    #[error("{method} on {peer} returned error: {message}")]
    Remote {
        peer: NodeId,
        method: String,
        message: String,
    },

    #[error("invalid method name {0:?}, expected \"<Service>.<Method>\"")]
    InvalidMethod(String),

    #[error("method {0} is already registered")]
    DuplicateMethod(String),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Dial { .. } => ErrorKind::DialFailure,
            RpcError::SessionBroken { .. } => ErrorKind::SessionBroken,
            RpcError::StreamOpen { .. } => ErrorKind::StreamOpenFailure,
            RpcError::Encode { .. } => ErrorKind::EncodeFailure,
            RpcError::Decode { .. } => ErrorKind::DecodeFailure,
            RpcError::Transport { .. } => ErrorKind::TransportFailure,
            RpcError::Remote { .. } => ErrorKind::RemoteError,
            RpcError::InvalidMethod(_) | RpcError::DuplicateMethod(_) => ErrorKind::InvalidMethod,
        }
    }

    /// The peer this error concerns, if any.
    pub fn peer(&self) -> Option<&NodeId> {
        match self {
            RpcError::Dial { peer, .. }
            | RpcError::SessionBroken { peer }
            | RpcError::StreamOpen { peer, .. }
            | RpcError::Encode { peer, .. }
            | RpcError::Decode { peer, .. }
            | RpcError::Transport { peer, .. }
            | RpcError::Remote { peer, .. } => Some(peer),
            RpcError::InvalidMethod(_) | RpcError::DuplicateMethod(_) => None,
        }
    }

    /// Map a multiplexer refusal to the matching error kind.
    pub(crate) fn stream_open(peer: &NodeId, source: StreamingError) -> Self {
        if source.is_session_closed() {
            RpcError::SessionBroken { peer: peer.clone() }
        } else {
            RpcError::StreamOpen {
                peer: peer.clone(),
                source,
            }
        }
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
