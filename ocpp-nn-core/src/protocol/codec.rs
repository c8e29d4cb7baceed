//! Frame encoding and decoding
//!
//! JSON frames (plain-text and hybrid) extend OCPP-J with an optional
//! trailing routing header:
//! - REQUEST: `[2, id, action, payload, header?]`
//! - RESPONSE: `[3, id, payload, header?]`
//! - REQUEST ERROR: `[4, id, code, description, details, header?]`
//! - RESPONSE ERROR: `[5, id, code, description, details, header?]`
//!
//! The header is `{"destination": [..], "networkPath": [..], "signatures": [..],
//! "payloadEncoding": "base64"}`, every field optional. Binary frames are a
//! bincode encoding of [`BinaryFrame`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::messages::{ErrorCode, ErrorMessage, Message, MessageType, Payload, Request, Response};
use super::negotiation::WireFormat;
use crate::signing::Signature;
use crate::source_route::{SourceRoute, SourceRouteError};
use crate::types::RequestId;

const BASE64_ENCODING: &str = "base64";

/// Errors in frame encoding and decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid frame: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("{format} frames cannot carry a binary payload")]
    UnsupportedPayload { format: WireFormat },

    #[error("invalid source route: {0}")]
    Route(#[from] SourceRouteError),

    /// The frame is a request whose id could be read but whose body could not
    #[error("malformed request {request_id}: {reason}")]
    MalformedRequest { request_id: RequestId, reason: String },
}

/// Encodes messages to bytes and back
pub trait MessageCodec: Send + Sync {
    /// Canonical bytes of a payload, as covered by signatures
    fn encode_payload(&self, payload: &Payload, format: WireFormat) -> Result<Vec<u8>, CodecError>;

    fn encode(&self, message: &Message, format: WireFormat) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8], format: WireFormat) -> Result<Message, CodecError>;
}

/// Codec for the OCPP JSON, hybrid and binary frame formats
#[derive(Debug, Clone, Copy, Default)]
pub struct OcppCodec;

impl MessageCodec for OcppCodec {
    fn encode_payload(&self, payload: &Payload, format: WireFormat) -> Result<Vec<u8>, CodecError> {
        match (payload, format) {
            (Payload::Json(value), _) => Ok(serde_json::to_vec(value)?),
            (Payload::Binary(_), WireFormat::PlainText) => {
                Err(CodecError::UnsupportedPayload { format })
            }
            (Payload::Binary(bytes), _) => Ok(bytes.clone()),
        }
    }

    fn encode(&self, message: &Message, format: WireFormat) -> Result<Vec<u8>, CodecError> {
        match format {
            WireFormat::BinaryCompact => Ok(bincode::serialize(&BinaryFrame::from_message(message)?)?),
            WireFormat::PlainText | WireFormat::Hybrid => encode_json(message, format),
        }
    }

    fn decode(&self, bytes: &[u8], format: WireFormat) -> Result<Message, CodecError> {
        match format {
            WireFormat::BinaryCompact => bincode::deserialize::<BinaryFrame>(bytes)?.into_message(),
            WireFormat::PlainText | WireFormat::Hybrid => decode_json(bytes),
        }
    }
}

// ============================================================================
// JSON frames
// ============================================================================

fn encode_json(message: &Message, format: WireFormat) -> Result<Vec<u8>, CodecError> {
    let mut header = Map::new();
    if !message.destination().is_empty() {
        header.insert("destination".into(), message.destination().to_json());
    }
    if !message.network_path().is_empty() {
        header.insert("networkPath".into(), message.network_path().to_json());
    }
    if !message.signatures().is_empty() {
        header.insert("signatures".into(), serde_json::to_value(message.signatures())?);
    }

    let mut payload_json = |payload: &Payload| -> Result<Value, CodecError> {
        match payload {
            Payload::Json(value) => Ok(value.clone()),
            Payload::Binary(_) if format == WireFormat::PlainText => {
                Err(CodecError::UnsupportedPayload { format })
            }
            Payload::Binary(bytes) => {
                header.insert("payloadEncoding".into(), Value::String(BASE64_ENCODING.into()));
                Ok(Value::String(BASE64.encode(bytes)))
            }
        }
    };

    let mut frame = match message {
        Message::Request(r) => vec![
            Value::from(MessageType::Call as i32),
            Value::String(r.request_id.to_string()),
            Value::String(r.action.clone()),
            payload_json(&r.payload)?,
        ],
        Message::Response(r) => vec![
            Value::from(MessageType::CallResult as i32),
            Value::String(r.request_id.to_string()),
            payload_json(&r.payload)?,
        ],
        Message::RequestError(e) | Message::ResponseError(e) => vec![
            Value::from(message.message_type() as i32),
            Value::String(e.request_id.to_string()),
            Value::String(e.error_code.to_string()),
            Value::String(e.description.clone()),
            e.details.clone(),
        ],
    };

    if !header.is_empty() {
        frame.push(Value::Object(header));
    }

    Ok(serde_json::to_vec(&Value::Array(frame))?)
}

/// Routing header of a JSON frame
#[derive(Debug, Default)]
struct Header {
    destination: SourceRoute,
    network_path: SourceRoute,
    signatures: Vec<Signature>,
    base64_payload: bool,
}

impl Header {
    fn parse(value: Option<&Value>) -> Result<Self, CodecError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let object = value
            .as_object()
            .ok_or_else(|| CodecError::InvalidFormat("routing header must be an object".into()))?;

        let route = |key: &str| -> Result<SourceRoute, CodecError> {
            match object.get(key) {
                Some(v) => Ok(SourceRoute::parse(v)?),
                None => Ok(SourceRoute::empty()),
            }
        };

        let signatures = match object.get("signatures") {
            Some(v) => Vec::<Signature>::deserialize(v)?,
            None => Vec::new(),
        };

        let base64_payload = match object.get("payloadEncoding").and_then(Value::as_str) {
            None => false,
            Some(BASE64_ENCODING) => true,
            Some(other) => {
                return Err(CodecError::InvalidFormat(format!(
                    "unknown payload encoding: {}",
                    other
                )))
            }
        };

        Ok(Self {
            destination: route("destination")?,
            network_path: route("networkPath")?,
            signatures,
            base64_payload,
        })
    }

    fn payload(&self, value: Value) -> Result<Payload, CodecError> {
        if !self.base64_payload {
            return Ok(Payload::Json(value));
        }
        let text = value
            .as_str()
            .ok_or_else(|| CodecError::InvalidFormat("base64 payload must be a string".into()))?;
        Ok(Payload::Binary(BASE64.decode(text)?))
    }
}

fn decode_json(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut array: Vec<Value> = serde_json::from_slice(bytes)?;

    if array.len() < 3 {
        return Err(CodecError::InvalidFormat(format!(
            "frame has {} elements",
            array.len()
        )));
    }

    let type_id = array[0]
        .as_i64()
        .ok_or_else(|| CodecError::InvalidFormat("message type must be a number".into()))?;
    let message_type =
        MessageType::from_id(type_id).ok_or(CodecError::UnknownMessageType(type_id))?;

    let request_id: RequestId = array[1]
        .as_str()
        .ok_or_else(|| CodecError::InvalidFormat("message id must be a string".into()))?
        .into();

    let expected = match message_type {
        MessageType::Call => 4,
        MessageType::CallResult => 3,
        MessageType::CallError | MessageType::CallResultError => 5,
    };
    if array.len() != expected && array.len() != expected + 1 {
        let reason = format!("{:?} frame has {} elements", message_type, array.len());
        return Err(match message_type {
            MessageType::Call => CodecError::MalformedRequest { request_id, reason },
            _ => CodecError::InvalidFormat(reason),
        });
    }

    let header_value = (array.len() > expected).then(|| array.remove(expected));

    match message_type {
        MessageType::Call => {
            decode_call(&request_id, &mut array, header_value.as_ref()).map_err(|e| {
                CodecError::MalformedRequest {
                    request_id: request_id.clone(),
                    reason: e.to_string(),
                }
            })
        }
        MessageType::CallResult => {
            let header = Header::parse(header_value.as_ref())?;
            Ok(Message::Response(Response {
                request_id,
                payload: header.payload(array.swap_remove(2))?,
                destination: header.destination,
                network_path: header.network_path,
                signatures: header.signatures,
            }))
        }
        MessageType::CallError | MessageType::CallResultError => {
            let header = Header::parse(header_value.as_ref())?;
            let error_code = array[2]
                .as_str()
                .map(|code| code.parse().unwrap_or(ErrorCode::GenericError))
                .unwrap_or(ErrorCode::GenericError);

            let error = ErrorMessage {
                request_id,
                error_code,
                description: array[3].as_str().unwrap_or("").to_string(),
                details: array.swap_remove(4),
                destination: header.destination,
                network_path: header.network_path,
                signatures: header.signatures,
            };

            Ok(match message_type {
                MessageType::CallError => Message::RequestError(error),
                _ => Message::ResponseError(error),
            })
        }
    }
}

fn decode_call(
    request_id: &RequestId,
    array: &mut [Value],
    header: Option<&Value>,
) -> Result<Message, CodecError> {
    let header = Header::parse(header)?;

    let action = array[2]
        .as_str()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| CodecError::InvalidFormat("action must be a non-empty string".into()))?
        .to_string();

    Ok(Message::Request(Request {
        request_id: request_id.clone(),
        action,
        payload: header.payload(array[3].take())?,
        destination: header.destination,
        network_path: header.network_path,
        signatures: header.signatures,
        timeout: None,
    }))
}

// ============================================================================
// Binary frames
// ============================================================================

const PAYLOAD_JSON: u8 = 0;
const PAYLOAD_BINARY: u8 = 1;

/// Compact binary frame
#[derive(Debug, Serialize, Deserialize)]
struct BinaryFrame {
    message_type: u8,
    request_id: String,
    action: String,
    error_code: Option<ErrorCode>,
    error_description: String,
    /// JSON text of the error details
    error_details: String,
    payload_kind: u8,
    payload: Vec<u8>,
    destination: Vec<String>,
    network_path: Vec<String>,
    signatures: Vec<Signature>,
}

impl BinaryFrame {
    fn from_message(message: &Message) -> Result<Self, CodecError> {
        let mut frame = Self {
            message_type: message.message_type() as u8,
            request_id: message.request_id().to_string(),
            action: String::new(),
            error_code: None,
            error_description: String::new(),
            error_details: String::new(),
            payload_kind: PAYLOAD_JSON,
            payload: Vec::new(),
            destination: message.destination().to_ids(),
            network_path: message.network_path().to_ids(),
            signatures: message.signatures().to_vec(),
        };

        let payload = match message {
            Message::Request(r) => {
                frame.action = r.action.clone();
                Some(&r.payload)
            }
            Message::Response(r) => Some(&r.payload),
            Message::RequestError(e) | Message::ResponseError(e) => {
                frame.error_code = Some(e.error_code);
                frame.error_description = e.description.clone();
                frame.error_details = serde_json::to_string(&e.details)?;
                None
            }
        };

        match payload {
            Some(Payload::Json(value)) => frame.payload = serde_json::to_vec(value)?,
            Some(Payload::Binary(bytes)) => {
                frame.payload_kind = PAYLOAD_BINARY;
                frame.payload = bytes.clone();
            }
            None => {}
        }

        Ok(frame)
    }

    fn into_message(self) -> Result<Message, CodecError> {
        let type_id = i64::from(self.message_type);
        let message_type =
            MessageType::from_id(type_id).ok_or(CodecError::UnknownMessageType(type_id))?;
        let request_id = RequestId::from(self.request_id);
        let destination = SourceRoute::parse_ids(&self.destination)?;
        let network_path = SourceRoute::parse_ids(&self.network_path)?;

        let payload = || -> Result<Payload, CodecError> {
            match self.payload_kind {
                PAYLOAD_JSON => Ok(Payload::Json(serde_json::from_slice(&self.payload)?)),
                PAYLOAD_BINARY => Ok(Payload::Binary(self.payload.clone())),
                other => Err(CodecError::InvalidFormat(format!("unknown payload kind {}", other))),
            }
        };

        let message = match message_type {
            MessageType::Call => {
                if self.action.is_empty() {
                    return Err(CodecError::MalformedRequest {
                        request_id,
                        reason: "missing action".into(),
                    });
                }
                let payload = payload().map_err(|e| CodecError::MalformedRequest {
                    request_id: request_id.clone(),
                    reason: e.to_string(),
                })?;
                Message::Request(Request {
                    request_id,
                    action: self.action.clone(),
                    payload,
                    destination,
                    network_path,
                    signatures: self.signatures.clone(),
                    timeout: None,
                })
            }
            MessageType::CallResult => Message::Response(Response {
                request_id,
                payload: payload()?,
                destination,
                network_path,
                signatures: self.signatures.clone(),
            }),
            MessageType::CallError | MessageType::CallResultError => {
                let details = if self.error_details.is_empty() {
                    Value::Object(Map::new())
                } else {
                    serde_json::from_str(&self.error_details)?
                };
                let error = ErrorMessage {
                    request_id,
                    error_code: self.error_code.unwrap_or(ErrorCode::GenericError),
                    description: self.error_description.clone(),
                    details,
                    destination,
                    network_path,
                    signatures: self.signatures.clone(),
                };
                if message_type == MessageType::CallError {
                    Message::RequestError(error)
                } else {
                    Message::ResponseError(error)
                }
            }
        };

        Ok(message)
    }
}
