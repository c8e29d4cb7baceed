//! OCPP protocol layer
//!
//! - `messages`: message envelopes (REQUEST, RESPONSE, REQUEST ERROR, RESPONSE ERROR)
//! - `codec`: JSON, hybrid and binary frame encoding
//! - `negotiation`: wire format selection from WebSocket subprotocols
//! - `operations`: typed operations used by the dispatcher's typed API

pub mod codec;
pub mod messages;
pub mod negotiation;
pub mod operations;

pub use codec::{CodecError, MessageCodec, OcppCodec};
pub use messages::*;
pub use negotiation::{negotiate, Subprotocol, WireFormat};
pub use operations::*;
