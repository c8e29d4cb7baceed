//! Application handler registry
//!
//! Maps action names to async handlers. Populated at startup and looked up
//! by action when a request addressed to this node arrives.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::protocol::messages::{ErrorCode, Payload, Request};
use crate::protocol::operations::Operation;

/// Handler failure, answered with a request error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl HandlerError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Handles inbound requests for one action
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Payload, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send,
{
    async fn handle(&self, request: Request) -> Result<Payload, HandlerError> {
        (self.0)(request).await
    }
}

/// Action name to handler mapping
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous handler
    pub fn register(&self, action: impl Into<String>, handler: impl Handler + 'static) {
        let action = action.into();
        debug!(action = %action, "Handler registered");
        self.handlers.write().insert(action, Arc::new(handler));
    }

    /// Register an async closure over the raw request
    pub fn register_fn<F, Fut>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
    {
        self.register(action, FnHandler(handler));
    }

    /// Register a handler for a typed operation
    ///
    /// Payloads that do not deserialize into `O` are answered with
    /// FormatViolation before `handler` runs.
    pub fn register_operation<O, F, Fut>(&self, handler: F)
    where
        O: Operation + DeserializeOwned + 'static,
        O::Response: Serialize,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O::Response, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_fn(O::ACTION, move |request: Request| {
            let handler = Arc::clone(&handler);
            async move {
                let operation: O = request.payload.parse().map_err(|e| {
                    HandlerError::new(ErrorCode::FormatViolation, format!("invalid {} payload: {}", O::ACTION, e))
                })?;
                let response = (*handler)(operation).await?;
                Payload::json(response)
                    .map_err(|e| HandlerError::new(ErrorCode::InternalError, e.to_string()))
            }
        });
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.read().contains_key(action)
    }

    pub fn remove(&self, action: &str) -> bool {
        self.handlers.write().remove(action).is_some()
    }

    /// Registered actions, sorted
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.read().keys().cloned().collect();
        actions.sort();
        actions
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::operations::{DataTransferRequest, DataTransferResponse, DataTransferStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_fn() {
        let registry = HandlerRegistry::new();
        registry.register_fn("Echo", |request: Request| async move { Ok(request.payload) });

        assert!(registry.contains("Echo"));
        assert!(registry.get("Reset").is_none());

        let handler = registry.get("Echo").unwrap();
        let payload = Payload::Json(json!({"a": 1}));
        let reply = handler
            .handle(Request::new("X".into(), "Echo", payload.clone()))
            .await
            .unwrap();
        assert_eq!(reply, payload);
    }

    #[tokio::test]
    async fn test_register_operation() {
        let registry = HandlerRegistry::new();
        registry.register_operation(|req: DataTransferRequest| async move {
            if req.vendor_id != "EK" {
                return Err(HandlerError::new(ErrorCode::NotSupported, "unknown vendor"));
            }
            Ok(DataTransferResponse {
                status: DataTransferStatus::Accepted,
                data: req.data,
            })
        });

        let handler = registry.get("DataTransfer").unwrap();

        let ok = handler
            .handle(Request::new(
                "X".into(),
                "DataTransfer",
                Payload::Json(json!({"vendorId": "EK", "data": 5})),
            ))
            .await
            .unwrap();
        assert_eq!(ok, Payload::Json(json!({"status": "Accepted", "data": 5})));

        let rejected = handler
            .handle(Request::new(
                "X".into(),
                "DataTransfer",
                Payload::Json(json!({"vendorId": "ACME"})),
            ))
            .await
            .unwrap_err();
        assert_eq!(rejected.code, ErrorCode::NotSupported);

        let malformed = handler
            .handle(Request::new("X".into(), "DataTransfer", Payload::Json(json!({"x": 1}))))
            .await
            .unwrap_err();
        assert_eq!(malformed.code, ErrorCode::FormatViolation);
    }

    #[test]
    fn test_actions_sorted() {
        let registry = HandlerRegistry::new();
        registry.register_fn("Reset", |_r: Request| async { Ok(Payload::empty()) });
        registry.register_fn("Heartbeat", |_r: Request| async { Ok(Payload::empty()) });
        assert_eq!(registry.actions(), vec!["Heartbeat", "Reset"]);
        assert!(registry.remove("Reset"));
        assert!(!registry.remove("Reset"));
    }
}
