//! Outcomes of a send
//!
//! Every send ends in exactly one terminal [`RequestState`] and carries a
//! [`DispatchResult`] the caller can inspect without matching on errors.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::protocol::messages::{ErrorCode, ErrorMessage, Response};
use crate::protocol::negotiation::WireFormat;
use crate::signing::SigningPolicy;
use crate::source_route::SourceRoute;
use crate::types::{ConnectionHandle, NodeId, RequestId};

/// Classification of a finished send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    /// The callee answered with a request error
    RequestError(ErrorCode),
    /// The reply did not have the expected shape, or the callee reported a
    /// response error
    FormationViolation,
    SignatureError,
    EncodingError,
    Unreachable,
    Timeout,
    Cancelled,
    SendFailed,
    ExceptionOccurred,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::RequestError(code) => write!(f, "RequestError({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Result sub-structure of every outcome
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub code: ResultCode,
    pub description: String,
    pub details: Value,
}

impl DispatchResult {
    pub fn ok() -> Self {
        Self::new(ResultCode::Ok, "")
    }

    pub fn new(code: ResultCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.description)
        }
    }
}

/// Lifecycle of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Created,
    Encoded,
    Signed,
    Sent,
    Responded,
    RequestErrored,
    ResponseErrored,
    TimedOut,
    Cancelled,
    SendFailed,
    SignatureRejected,
    Unreachable,
    EncodingFailed,
    /// A panic was caught while sending
    Faulted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RequestState::Created | RequestState::Encoded | RequestState::Signed | RequestState::Sent
        )
    }
}

/// Outcome of [`Dispatcher::send`](crate::Dispatcher::send)
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request_id: RequestId,
    pub action: String,
    /// Final destination
    pub destination: NodeId,
    pub state: RequestState,
    pub result: DispatchResult,
    pub response: Option<Response>,
    /// Request error or response error received from the peer
    pub error: Option<ErrorMessage>,
    /// Connection the request was written to
    pub connection: Option<ConnectionHandle>,
    /// Connection the reply arrived on
    pub reply_connection: Option<ConnectionHandle>,
    pub runtime: Duration,
}

impl Outcome {
    pub fn new(
        request_id: RequestId,
        action: impl Into<String>,
        destination: NodeId,
        state: RequestState,
        result: DispatchResult,
    ) -> Self {
        Self {
            request_id,
            action: action.into(),
            destination,
            state,
            result,
            response: None,
            error: None,
            connection: None,
            reply_connection: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Typed reply of [`Dispatcher::send_operation`](crate::Dispatcher::send_operation)
///
/// `body` is set only when `result` is Ok.
#[derive(Debug, Clone)]
pub struct TypedResponse<T> {
    pub request_id: RequestId,
    pub result: DispatchResult,
    pub body: Option<T>,
    pub runtime: Duration,
}

impl<T> TypedResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The body, or the result explaining why there is none
    pub fn into_result(self) -> Result<T, DispatchResult> {
        match self.body {
            Some(body) if self.result.is_ok() => Ok(body),
            _ => Err(self.result),
        }
    }
}

/// Per-call overrides for the typed send helpers
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub request_id: Option<RequestId>,
    pub timeout: Option<Duration>,
    pub format: Option<WireFormat>,
    /// Explicit source route instead of a single-hop route to the destination
    pub route: Option<SourceRoute>,
    pub signing: Option<Arc<dyn SigningPolicy>>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_route(mut self, route: SourceRoute) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_signing(mut self, signing: Arc<dyn SigningPolicy>) -> Self {
        self.signing = Some(signing);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .field("format", &self.format)
            .field("route", &self.route)
            .field("signing", &self.signing.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_display() {
        assert_eq!(DispatchResult::ok().to_string(), "Ok");
        assert_eq!(
            DispatchResult::new(ResultCode::RequestError(ErrorCode::NotImplemented), "no handler")
                .to_string(),
            "RequestError(NotImplemented): no handler"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestState::Sent.is_terminal());
        assert!(RequestState::TimedOut.is_terminal());
        assert!(RequestState::Faulted.is_terminal());
    }

    #[test]
    fn test_typed_response_into_result() {
        let ok = TypedResponse {
            request_id: "r".into(),
            result: DispatchResult::ok(),
            body: Some(7),
            runtime: Duration::ZERO,
        };
        assert_eq!(ok.into_result().unwrap(), 7);

        let failed: TypedResponse<u8> = TypedResponse {
            request_id: "r".into(),
            result: DispatchResult::new(ResultCode::Timeout, "no reply"),
            body: None,
            runtime: Duration::ZERO,
        };
        assert_eq!(failed.into_result().unwrap_err().code, ResultCode::Timeout);
    }
}
