//! Request/response framing for calls.
//!
//! A call owns one stream and exchanges exactly two length-delimited frames
//! over it: a [`RequestFrame`] followed by a [`ResponseFrame`]. Frame bodies
//! and typed payloads are `bincode` encoded.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest request or response frame accepted (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// First frame on a call stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// `"<Service>.<Method>"`.
    pub method: String,
    /// Encoded request payload.
    pub body: Vec<u8>,
}

/// Second frame on a call stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Application-level failure reported by the handler.
    pub error: Option<String>,
    /// Encoded response payload; empty when `error` is set.
    pub body: Vec<u8>,
}

impl ResponseFrame {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { error: None, body }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            body: Vec::new(),
        }
    }
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> bincode::Result<Bytes> {
    bincode::serialize(value).map(Bytes::from)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> bincode::Result<T> {
    bincode::deserialize(bytes)
}

/// Wrap a stream in the length-delimited call framing.
pub fn framed<S>(stream: S) -> Framed<S, LengthDelimitedCodec>
where
    S: AsyncRead + AsyncWrite,
{
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_MESSAGE_SIZE)
        .new_framed(stream)
}
