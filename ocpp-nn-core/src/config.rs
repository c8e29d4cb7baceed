//! Configuration for a networking node
//!
//! `DispatcherConfig` holds the node's identity and dispatch tuning.
//! `RoutesConfig` is the JSON document of static hub routes loaded at startup:
//!
//! ```json
//! {"routes": [{"destinations": ["CS001"], "hub": "HUB1", "priority": 0, "weight": 1, "timeoutSecs": 60}]}
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::protocol::negotiation::WireFormat;
use crate::routing::{Reachability, RoutingTable, Via};
use crate::types::{NodeId, NodeIdError};

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid routes document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("route {index}: invalid node id {value:?}: {source}")]
    InvalidNodeId {
        index: usize,
        value: String,
        #[source]
        source: NodeIdError,
    },

    #[error("route {index} has no destinations")]
    NoDestinations { index: usize },

    #[error("route {index}: timeout of {secs}s is out of range")]
    InvalidTimeout { index: usize, secs: u64 },
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// This node's identity
    pub node_id: NodeId,

    /// Central system alias
    pub default_upstream: NodeId,

    /// Route unknown destinations via the default upstream
    pub upstream_fallback: bool,

    /// Default time to wait for a reply
    pub request_timeout: Duration,

    /// Period of the ledger timeout sweep
    pub sweep_interval: Duration,

    /// Format used by the typed send helpers
    pub default_format: WireFormat,

    /// Forward messages addressed to other nodes (hub mode)
    pub forward_messages: bool,

    /// Priority of routes registered for attached connections
    pub connection_priority: u8,

    /// Capacity of the observability event channel
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new("ocpp-node"),
            default_upstream: NodeId::csms(),
            upstream_fallback: false,
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            default_format: WireFormat::PlainText,
            forward_messages: true,
            connection_priority: 0,
            event_capacity: 256,
        }
    }
}

impl DispatcherConfig {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Set the central system alias
    pub fn with_default_upstream(mut self, upstream: impl Into<NodeId>) -> Self {
        self.default_upstream = upstream.into();
        self
    }

    /// Resolve destinations without a route through the default upstream
    pub fn with_upstream_fallback(mut self, enabled: bool) -> Self {
        self.upstream_fallback = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_default_format(mut self, format: WireFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Terminate every message instead of forwarding
    pub fn without_forwarding(mut self) -> Self {
        self.forward_messages = false;
        self
    }

    pub fn with_connection_priority(mut self, priority: u8) -> Self {
        self.connection_priority = priority;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

fn default_weight() -> u8 {
    1
}

/// One static route: several destinations reached through one hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRouteConfig {
    pub destinations: Vec<String>,
    pub hub: String,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_weight")]
    pub weight: u8,
    /// Expiry relative to load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Static routes document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesConfig {
    #[serde(default)]
    pub routes: Vec<StaticRouteConfig>,
}

impl RoutesConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Validate every route, then register them all in `table`
    ///
    /// Nothing is registered if any route is invalid. Returns the number of
    /// candidates registered.
    pub fn apply(&self, table: &RoutingTable) -> Result<usize, ConfigError> {
        let candidates = self.candidates()?;
        let count = candidates.len();
        for candidate in candidates {
            table.insert(candidate);
        }
        info!(routes = self.routes.len(), candidates = count, "Static routes loaded");
        Ok(count)
    }

    fn candidates(&self) -> Result<Vec<Reachability>, ConfigError> {
        let mut candidates = Vec::new();

        for (index, route) in self.routes.iter().enumerate() {
            if route.destinations.is_empty() {
                return Err(ConfigError::NoDestinations { index });
            }

            let node = |value: &str| -> Result<NodeId, ConfigError> {
                value.parse().map_err(|source| ConfigError::InvalidNodeId {
                    index,
                    value: value.to_string(),
                    source,
                })
            };

            let hub = node(&route.hub)?;
            let ttl = route
                .timeout_secs
                .map(|secs| {
                    i64::try_from(secs)
                        .ok()
                        .and_then(chrono::Duration::try_seconds)
                        .ok_or(ConfigError::InvalidTimeout { index, secs })
                })
                .transpose()?;

            for destination in &route.destinations {
                let mut candidate = Reachability::new(node(destination)?, Via::Hub(hub.clone()))
                    .with_priority(route.priority)
                    .with_weight(route.weight);
                if let Some(ttl) = ttl {
                    candidate = candidate.expiring_after(ttl);
                }
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_builder() {
        let config = DispatcherConfig::new("HUB1")
            .with_default_upstream("CENTRAL")
            .with_upstream_fallback(true)
            .with_request_timeout(Duration::from_millis(500))
            .with_default_format(WireFormat::Hybrid)
            .without_forwarding()
            .with_event_capacity(0);

        assert_eq!(config.node_id, NodeId::from("HUB1"));
        assert_eq!(config.default_upstream, NodeId::from("CENTRAL"));
        assert!(config.upstream_fallback);
        assert_eq!(config.request_timeout, Duration::from_millis(500));
        assert_eq!(config.default_format, WireFormat::Hybrid);
        assert!(!config.forward_messages);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.default_upstream, NodeId::csms());
        assert!(!config.upstream_fallback);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.forward_messages);
    }

    #[test]
    fn test_routes_from_json() {
        let config = RoutesConfig::from_json(
            r#"{"routes": [
                {"destinations": ["CS001", "CS002"], "hub": "HUB1", "priority": 2, "timeoutSecs": 60},
                {"destinations": ["CS003"], "hub": "HUB2"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].weight, 1);
        assert_eq!(config.routes[1].priority, 0);

        let table = RoutingTable::new();
        assert_eq!(config.apply(&table).unwrap(), 3);

        let candidates = table.candidates(&"CS002".into());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].hub(), Some(&NodeId::from("HUB1")));
        assert_eq!(candidates[0].priority, 2);
        assert!(candidates[0].timeout.is_some());
        assert!(table.candidates(&"CS003".into())[0].timeout.is_none());
    }

    #[test]
    fn test_invalid_routes_register_nothing() {
        let table = RoutingTable::new();

        let config = RoutesConfig::from_json(
            r#"{"routes": [
                {"destinations": ["CS001"], "hub": "HUB1"},
                {"destinations": ["bad id"], "hub": "HUB1"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            config.apply(&table),
            Err(ConfigError::InvalidNodeId { index: 1, .. })
        ));
        assert!(table.is_empty());

        let config = RoutesConfig::from_json(r#"{"routes": [{"destinations": [], "hub": "HUB1"}]}"#).unwrap();
        assert!(matches!(
            config.apply(&table),
            Err(ConfigError::NoDestinations { index: 0 })
        ));

        assert!(matches!(
            RoutesConfig::from_json(r#"{"routes": [{"hub": "HUB1"}]}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_routes_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"routes": [{{"destinations": ["CS001"], "hub": "HUB1"}}]}}"#).unwrap();

        let config = RoutesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.routes[0].hub, "HUB1");

        let missing = RoutesConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
