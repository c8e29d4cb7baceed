//! Source routes
//!
//! A source route is the ordered list of node hops attached to every message.
//! Routes are values: operations that change a route return a new instance.
//!
//! ```text
//! [HUB1, HUB2, CS001]
//!   next ─┘           └─ last (final destination)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::{NodeId, NodeIdError};

/// Errors parsing a source route from its wire representation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceRouteError {
    #[error("source route must be an array of node ids")]
    NotAnArray,

    #[error("source route element {index} is not a string")]
    NotAString { index: usize },

    #[error("source route element {index} is invalid: {source}")]
    InvalidNodeId {
        index: usize,
        #[source]
        source: NodeIdError,
    },
}

/// Ordered path of node identifiers
///
/// Ordering is lexicographic over the elements, a strict prefix sorting first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRoute(Vec<NodeId>);

impl SourceRoute {
    /// The empty route
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Single-hop route to `node`
    pub fn to(node: NodeId) -> Self {
        Self(vec![node])
    }

    /// Route through the given hops, in order
    pub fn from_hops(hops: impl IntoIterator<Item = NodeId>) -> Self {
        Self(hops.into_iter().collect())
    }

    /// First hop, or the zero node for an empty route
    pub fn next(&self) -> NodeId {
        self.0.first().cloned().unwrap_or_else(NodeId::zero)
    }

    /// Final hop, or the zero node for an empty route
    pub fn last(&self) -> NodeId {
        self.0.last().cloned().unwrap_or_else(NodeId::zero)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hops(&self) -> &[NodeId] {
        &self.0
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    /// Drop the first hop. The final destination is never removed.
    pub fn remove_first(&self) -> Self {
        if self.0.len() <= 1 {
            return self.clone();
        }
        Self(self.0[1..].to_vec())
    }

    /// Copy of this route with `node` appended
    pub fn with_hop(&self, node: NodeId) -> Self {
        let mut hops = self.0.clone();
        hops.push(node);
        Self(hops)
    }

    /// The same hops in reverse order
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }

    /// Parse from the array-of-identifiers representation
    pub fn parse(value: &Value) -> Result<Self, SourceRouteError> {
        let items = value.as_array().ok_or(SourceRouteError::NotAnArray)?;

        let ids = items
            .iter()
            .enumerate()
            .map(|(index, item)| item.as_str().ok_or(SourceRouteError::NotAString { index }))
            .collect::<Result<Vec<_>, _>>()?;

        Self::parse_ids(ids)
    }

    /// Parse from a sequence of identifier strings
    pub fn parse_ids<S: AsRef<str>>(ids: impl IntoIterator<Item = S>) -> Result<Self, SourceRouteError> {
        let hops = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                id.as_ref()
                    .parse::<NodeId>()
                    .map_err(|source| SourceRouteError::InvalidNodeId { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(hops))
    }

    /// Identifiers as plain strings
    pub fn to_ids(&self) -> Vec<String> {
        self.0.iter().map(|id| id.as_str().to_string()).collect()
    }

    /// Serialize to the array-of-identifiers representation
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|id| Value::String(id.as_str().to_string()))
                .collect(),
        )
    }
}

impl fmt::Display for SourceRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", hop)?;
        }
        write!(f, "]")
    }
}

impl From<NodeId> for SourceRoute {
    fn from(node: NodeId) -> Self {
        Self::to(node)
    }
}
