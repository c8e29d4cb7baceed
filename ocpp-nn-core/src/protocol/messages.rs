//! OCPP message envelopes
//!
//! Every message is one of four kinds, identified on the wire by its type id:
//! - REQUEST (CALL, 2): a call awaiting a reply
//! - RESPONSE (CALLRESULT, 3): the successful reply
//! - REQUEST ERROR (CALLERROR, 4): the callee rejected the request
//! - RESPONSE ERROR (CALLRESULTERROR, 5): the caller rejected the reply
//!
//! All kinds carry the request id, the source route still to travel
//! (`destination`) and the hops already taken (`network_path`).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::signing::Signature;
use crate::source_route::SourceRoute;
use crate::types::{NodeId, RequestId};

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
    CallResultError = 5,
}

impl MessageType {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            5 => Some(MessageType::CallResultError),
            _ => None,
        }
    }
}

/// OCPP error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    /// Unknown codes map to `GenericError`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_value(Value::String(s.to_string())).unwrap_or(ErrorCode::GenericError))
    }
}

/// Message body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    /// Serialize a typed body to JSON
    pub fn json(body: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Payload::Json(serde_json::to_value(body)?))
    }

    pub fn empty() -> Self {
        Payload::Json(Value::Object(serde_json::Map::new()))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    /// Deserialize into a typed body; binary payloads are read as JSON bytes
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            Payload::Binary(bytes) => serde_json::from_slice(bytes),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

/// REQUEST
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: RequestId,
    pub action: String,
    pub payload: Payload,
    pub destination: SourceRoute,
    pub network_path: SourceRoute,
    pub signatures: Vec<Signature>,
    /// Local wait budget, not transmitted
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request to `destination` with a fresh request id
    pub fn new(destination: NodeId, action: impl Into<String>, payload: Payload) -> Self {
        Self {
            request_id: RequestId::new(),
            action: action.into(),
            payload,
            destination: SourceRoute::to(destination),
            network_path: SourceRoute::empty(),
            signatures: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Address the request along an explicit source route
    pub fn with_route(mut self, destination: SourceRoute) -> Self {
        self.destination = destination;
        self
    }

    /// Route back to the sender: the hops taken, reversed
    pub fn reply_route(&self) -> SourceRoute {
        self.network_path.reversed()
    }
}

/// RESPONSE
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: RequestId,
    pub payload: Payload,
    pub destination: SourceRoute,
    pub network_path: SourceRoute,
    pub signatures: Vec<Signature>,
}

impl Response {
    /// Build the reply to `request`
    pub fn to(request: &Request, payload: Payload) -> Self {
        Self {
            request_id: request.request_id.clone(),
            payload,
            destination: request.reply_route(),
            network_path: SourceRoute::empty(),
            signatures: Vec::new(),
        }
    }

    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.payload.parse()
    }
}

/// REQUEST ERROR and RESPONSE ERROR body
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub request_id: RequestId,
    pub error_code: ErrorCode,
    pub description: String,
    pub details: Value,
    pub destination: SourceRoute,
    pub network_path: SourceRoute,
    pub signatures: Vec<Signature>,
}

impl ErrorMessage {
    pub fn new(
        request_id: RequestId,
        error_code: ErrorCode,
        description: impl Into<String>,
        destination: SourceRoute,
    ) -> Self {
        Self {
            request_id,
            error_code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
            destination,
            network_path: SourceRoute::empty(),
            signatures: Vec::new(),
        }
    }

    /// Request error answering `request`
    pub fn for_request(request: &Request, error_code: ErrorCode, description: impl Into<String>) -> Self {
        Self::new(
            request.request_id.clone(),
            error_code,
            description,
            request.reply_route(),
        )
    }

    /// Response error answering `response`
    pub fn for_response(response: &Response, error_code: ErrorCode, description: impl Into<String>) -> Self {
        Self::new(
            response.request_id.clone(),
            error_code,
            description,
            response.network_path.reversed(),
        )
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Any OCPP message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    RequestError(ErrorMessage),
    ResponseError(ErrorMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Call,
            Message::Response(_) => MessageType::CallResult,
            Message::RequestError(_) => MessageType::CallError,
            Message::ResponseError(_) => MessageType::CallResultError,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Message::Request(r) => &r.request_id,
            Message::Response(r) => &r.request_id,
            Message::RequestError(e) | Message::ResponseError(e) => &e.request_id,
        }
    }

    pub fn destination(&self) -> &SourceRoute {
        match self {
            Message::Request(r) => &r.destination,
            Message::Response(r) => &r.destination,
            Message::RequestError(e) | Message::ResponseError(e) => &e.destination,
        }
    }

    pub fn network_path(&self) -> &SourceRoute {
        match self {
            Message::Request(r) => &r.network_path,
            Message::Response(r) => &r.network_path,
            Message::RequestError(e) | Message::ResponseError(e) => &e.network_path,
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        match self {
            Message::Request(r) => &r.signatures,
            Message::Response(r) => &r.signatures,
            Message::RequestError(e) | Message::ResponseError(e) => &e.signatures,
        }
    }

    /// Replace the routing fields
    pub fn with_routing(mut self, destination: SourceRoute, network_path: SourceRoute) -> Self {
        let (dst, path) = match &mut self {
            Message::Request(r) => (&mut r.destination, &mut r.network_path),
            Message::Response(r) => (&mut r.destination, &mut r.network_path),
            Message::RequestError(e) | Message::ResponseError(e) => {
                (&mut e.destination, &mut e.network_path)
            }
        };
        *dst = destination;
        *path = network_path;
        self
    }

    pub fn with_signatures(mut self, signatures: Vec<Signature>) -> Self {
        match &mut self {
            Message::Request(r) => r.signatures = signatures,
            Message::Response(r) => r.signatures = signatures,
            Message::RequestError(e) | Message::ResponseError(e) => e.signatures = signatures,
        }
        self
    }

    /// Label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::RequestError(_) => "request error",
            Message::ResponseError(_) => "response error",
        }
    }
}
