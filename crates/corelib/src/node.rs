//! Node abstractions for the transport layer.
//!
//! Nodes are identified by an opaque `NodeId` that is cheap to clone,
//! compare and hash, so it can key the session pool directly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stable identity of a remote node.
///
/// Newtype over a shared string: the id is usually a hash of the node's
/// public key, but an address-derived token (`"127.0.0.1:4444"`) works just
/// as well. Clones only bump a reference count.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Build a node id, rejecting empty or whitespace-padded values.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(Error::InvalidNodeId("empty".to_string()));
        }
        if id.trim() != id {
            return Err(Error::InvalidNodeId(format!("{:?} has surrounding whitespace", id)));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Logical node reachable over the network.
///
/// Keep this struct small and cheap to clone; heavy mutable state (sessions,
/// metrics, etc.) lives in the RPC layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// `host:port` the node accepts RPC connections on.
    pub addr: String,
    /// Public key bytes, when the identity subsystem knows them.
    pub public_key: Option<Vec<u8>>,
}

impl Node {
    /// Construct a new node with basic metadata.
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            public_key: None,
        }
    }

    pub fn with_public_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.public_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_rejects_empty() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new(" node").is_err());
        assert!(NodeId::new("node").is_ok());
    }

    #[test]
    fn test_node_id_display_and_parse() {
        let id: NodeId = "127.0.0.1:4444".parse().unwrap();
        assert_eq!(id.to_string(), "127.0.0.1:4444");
        assert_eq!(id.as_str(), "127.0.0.1:4444");
        assert_eq!(format!("{:?}", id), "NodeId(127.0.0.1:4444)");
    }

    #[test]
    fn test_node_id_clone_is_equal() {
        let a = NodeId::new("00000f3b43288fe99831eb533ab77ec455d13e11fc38ec35a42d4edd17aa320d").unwrap();
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new(NodeId::new("leader").unwrap(), "127.0.0.1:2230").with_public_key(vec![1, 2, 3]);
        assert_eq!(node.addr, "127.0.0.1:2230");
        assert_eq!(node.public_key.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
