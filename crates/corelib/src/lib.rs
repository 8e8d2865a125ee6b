//! Core library shared by the transport crates.
//!
//! This crate provides the node-level abstractions the RPC layer keys on:
//! - Node identity (`NodeId`) and node records
//! - Identity/routing resolution from a node id to a network address

pub mod error;
pub mod network;
pub mod node;

pub use error::{Error, Result};
pub use network::{NodeResolver, RouteTable};
pub use node::{Node, NodeId};
