//! Node-to-node RPC transport.
//!
//! This crate keeps one multiplexed session per remote node and issues
//! request/response calls over short-lived streams carved out of it:
//! - [`Dialer`]: pluggable peer id → connection function
//! - [`Session`]: one multiplexed connection with a liveness state
//! - [`SessionPool`]: dedup-on-create registry of sessions, with a
//!   process-wide instance
//! - [`Caller`]: one RPC per call, with transparent recovery from dropped
//!   sessions
//! - [`Server`]: the serving side, dispatching `"<Service>.<Method>"` names
//!   to registered handlers
//!
//! ## Example
//!
//! ```no_run
//! use corelib::NodeId;
//! use rpc::{Caller, Server, ServiceMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut services = ServiceMap::new();
//!     services.register_fn("Echo.Say", |msg: String| async move { Ok::<_, String>(msg) })?;
//!     let server = Server::new(services).spawn("127.0.0.1:4444").await?;
//!
//!     corelib::RouteTable::global().set_node(corelib::Node::new(
//!         NodeId::new("echo")?,
//!         server.local_addr().to_string(),
//!     ));
//!
//!     let reply: String = Caller::new()
//!         .call_node(&NodeId::new("echo")?, "Echo.Say", "hello")
//!         .await?;
//!     assert_eq!(reply, "hello");
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod caller;
pub mod codec;
pub mod config;
pub mod dialer;
pub mod error;
pub mod method;
pub mod pool;
pub mod server;
pub mod session;

pub use caller::Caller;
pub use config::{DialerConfig, PoolConfig};
pub use dialer::{dial_fn, BoxConnection, Connection, DialFn, Dialer, TcpDialer};
pub use error::{DialError, ErrorKind, Result, RpcError};
pub use method::MethodName;
pub use pool::SessionPool;
pub use server::{Handler, Server, ServerHandle, ServiceMap};
pub use session::{Session, SessionState};

/// Logical stream handed out by the pool; one per call.
pub type Stream = streaming::MuxStream;
