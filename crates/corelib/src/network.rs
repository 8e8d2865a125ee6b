//! Identity and routing resolution.
//!
//! The RPC layer never stores addresses itself: dialers ask a
//! [`NodeResolver`] to turn a [`NodeId`] into a [`Node`] record right before
//! connecting. [`RouteTable`] is the in-memory implementation, with one
//! process-wide instance for callers that have no explicit table to inject.

use crate::error::{Error, Result};
use crate::node::{Node, NodeId};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

/// Resolves a node identity to its network address and key material.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync) as they are shared by
/// every dialer in the process.
pub trait NodeResolver: Send + Sync + 'static {
    /// Look up the node record for `id`.
    fn resolve(&self, id: &NodeId) -> Result<Node>;
}

impl<R: NodeResolver + ?Sized> NodeResolver for Arc<R> {
    fn resolve(&self, id: &NodeId) -> Result<Node> {
        (**self).resolve(id)
    }
}

/// Concurrent in-memory route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    nodes: DashMap<NodeId, Node>,
}

static GLOBAL_ROUTES: OnceLock<Arc<RouteTable>> = OnceLock::new();

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide route table, created on first use.
    pub fn global() -> Arc<RouteTable> {
        Arc::clone(GLOBAL_ROUTES.get_or_init(|| Arc::new(RouteTable::new())))
    }

    /// Insert or replace the record for `node.id`.
    ///
    /// Returns the previous record, if any.
    pub fn set_node(&self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove_node(&self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(id).map(|(_, node)| node)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeResolver for RouteTable {
    fn resolve(&self, id: &NodeId) -> Result<Node> {
        let node = self.get_node(id).ok_or_else(|| Error::UnknownNode(id.clone()))?;
        if node.addr.is_empty() {
            return Err(Error::InvalidNode(format!("{} has no address", id)));
        }
        Ok(node)
    }
}
