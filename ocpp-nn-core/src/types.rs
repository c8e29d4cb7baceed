//! Core identifiers for the networking node

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::negotiation::Subprotocol;

/// Identifier of the zero (unaddressed) node
pub const ZERO_NODE_ID: &str = "";

/// Identifier used for fan-out to every directly connected peer
pub const BROADCAST_NODE_ID: &str = "*";

/// Well-known alias of the central system
pub const CSMS_NODE_ID: &str = "CSMS";

/// Errors parsing a node identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("node id must not contain whitespace: {0:?}")]
    Whitespace(String),
}

/// Identifier of a protocol participant (charging station, central system, hub)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id without validation
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The unaddressed node
    pub fn zero() -> Self {
        Self(ZERO_NODE_ID.to_string())
    }

    /// Fan-out address, never routed over more than one hop
    pub fn broadcast() -> Self {
        Self(BROADCAST_NODE_ID.to_string())
    }

    /// Default upstream alias of the central system
    pub fn csms() -> Self {
        Self(CSMS_NODE_ID.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_NODE_ID
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_NODE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "<zero>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(char::is_whitespace) {
            return Err(NodeIdError::Whitespace(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Correlation identifier shared by a request and every reply to it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random request id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Handle of a live connection owned by the transport
///
/// The core only clones handles for the duration of a send; it never
/// opens or closes connections itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    /// Transport-assigned connection id
    pub id: u64,
    /// Remote address or label, for diagnostics
    pub remote: String,
    /// Subprotocol negotiated during the handshake
    pub subprotocol: Subprotocol,
}

impl ConnectionHandle {
    pub fn new(id: u64, remote: impl Into<String>, subprotocol: Subprotocol) -> Self {
        Self {
            id,
            remote: remote.into(),
            subprotocol,
        }
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}({}, {})", self.id, self.remote, self.subprotocol)
    }
}

/// Which side opened a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_node_ids() {
        assert!(NodeId::zero().is_zero());
        assert!(NodeId::broadcast().is_broadcast());
        assert_eq!(NodeId::csms().as_str(), "CSMS");
        assert!(!NodeId::csms().is_zero());
    }

    #[test]
    fn test_node_id_ordering() {
        let a = NodeId::from("CS001");
        let b = NodeId::from("CS002");
        assert!(a < b);
        assert!(NodeId::zero() < a);
    }

    #[test]
    fn test_node_id_parse_rejects_whitespace() {
        assert!("CS 001".parse::<NodeId>().is_err());
        assert_eq!("CS001".parse::<NodeId>().unwrap(), NodeId::from("CS001"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let json = serde_json::to_string(&NodeId::from("HUB1")).unwrap();
        assert_eq!(json, "\"HUB1\"");
    }
}
