//! Stream multiplexing over a single connection.
//!
//! This crate carves many independent byte streams out of one ordered
//! connection using the yamux protocol:
//! - Multiplexed sessions (client and server side), each driven by one
//!   background task that owns the `yamux::Connection`
//! - Streams usable anywhere a Tokio `AsyncRead + AsyncWrite` is expected
//!
//! ## Flow Control
//!
//! yamux gives every stream its own receive window, so a writer whose peer
//! stops reading is suspended instead of buffering without bound. Inbound
//! streams are handed to [`MuxSession::accept`] through a bounded queue; while
//! that queue is full the session stops reading the connection.

pub mod config;
pub mod error;
pub mod session;
pub mod stream;

pub use config::MuxConfig;
pub use error::StreamingError;
pub use session::{MuxSession, Role};
pub use stream::MuxStream;
pub use yamux::StreamId;
