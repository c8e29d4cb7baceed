//! Reachability candidates

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::fmt;

use crate::types::{ConnectionHandle, Direction, NodeId};

/// How a candidate reaches its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Via {
    /// Over a connection this node opened
    Outbound(ConnectionHandle),
    /// Over a connection the peer opened
    Inbound(ConnectionHandle),
    /// Through another node; must be resolved again
    Hub(NodeId),
}

impl Via {
    pub fn connection(connection: ConnectionHandle, direction: Direction) -> Self {
        match direction {
            Direction::Outbound => Via::Outbound(connection),
            Direction::Inbound => Via::Inbound(connection),
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Via::Outbound(c) => write!(f, "outbound {}", c),
            Via::Inbound(c) => write!(f, "inbound {}", c),
            Via::Hub(hub) => write!(f, "hub {}", hub),
        }
    }
}

/// One way to reach a destination node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
    pub destination: NodeId,
    pub via: Via,
    /// Lower is preferred
    pub priority: u8,
    /// Preference among equal priorities, higher first
    pub weight: u8,
    pub timestamp: DateTime<Utc>,
    /// Absolute expiry
    pub timeout: Option<DateTime<Utc>>,
}

impl Reachability {
    pub fn new(destination: NodeId, via: Via) -> Self {
        Self {
            destination,
            via,
            priority: 0,
            weight: 0,
            timestamp: Utc::now(),
            timeout: None,
        }
    }

    /// Direct candidate over a live connection
    pub fn direct(destination: NodeId, connection: ConnectionHandle, direction: Direction) -> Self {
        Self::new(destination, Via::connection(connection, direction))
    }

    /// Indirect candidate through `hub`
    pub fn via_hub(destination: NodeId, hub: NodeId) -> Self {
        Self::new(destination, Via::Hub(hub))
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<DateTime<Utc>>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expire `ttl` after the candidate's timestamp
    pub fn expiring_after(self, ttl: Duration) -> Self {
        let expiry = self.timestamp + ttl;
        self.with_timeout(Some(expiry))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeout.is_some_and(|t| t <= now)
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.via, Via::Hub(_))
    }

    pub fn hub(&self) -> Option<&NodeId> {
        match &self.via {
            Via::Hub(hub) => Some(hub),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match &self.via {
            Via::Outbound(c) | Via::Inbound(c) => Some(c),
            Via::Hub(_) => None,
        }
    }

    /// Resolution order: priority ascending, weight descending, oldest first
    pub fn preference(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.weight.cmp(&self.weight))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}
