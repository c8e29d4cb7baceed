//! # OCPP Networking Node Core
//!
//! Transport-independent core of an OCPP networking node: overlay source
//! routing between charging stations, hubs and central systems, and
//! request/response dispatch with correlation, timeouts and cancellation.
//!
//! ## Architecture
//!
//! ```text
//!  application ── send_operation ──┐          ┌── HandlerRegistry
//!                                  ▼          │
//! ┌────────────────────────────────────────────────────────┐
//! │ Dispatcher                                             │
//! │  encode ─► sign ─► RoutingTable ─► Ledger ─► Transport │
//! │  receive ─► complete / handle / forward                │
//! └────────────────────────────────────────────────────────┘
//!        │ frames                              ▲ frames
//!        ▼                                     │
//!   Transport (WebSocket, in-memory channels, ...)
//! ```
//!
//! ## Overlay routing
//!
//! Every message carries a `destination` source route (hops still to travel,
//! final destination last) and a `network_path` (hops taken, origin first).
//! A node without a direct connection to the destination resolves it through
//! hubs; hubs strip themselves from the route and forward. Replies travel
//! back along the reversed network path.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocpp_nn_core::{
//!     ChannelTransport, Direction, Dispatcher, DispatcherConfig, HeartbeatRequest,
//!     RequestOptions, Subprotocol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ChannelTransport::new());
//!     let station = Dispatcher::new(DispatcherConfig::new("CS001"), transport.clone());
//!
//!     let (to_csms, _csms_side) =
//!         transport.link(&"CS001".into(), &"CSMS".into(), Subprotocol::default());
//!     station.attach_link(to_csms, Direction::Outbound);
//!     station.spawn_timeout_sweeper();
//!
//!     let reply = station
//!         .send_operation("CSMS", HeartbeatRequest {}, RequestOptions::new())
//!         .await?;
//!     println!("{}", reply.result);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod routing;
pub mod signing;
pub mod source_route;
pub mod transport;
pub mod types;

pub use config::{ConfigError, DispatcherConfig, RoutesConfig, StaticRouteConfig};
pub use dispatch::{
    DispatchEvent, DispatchResult, Dispatcher, DispatcherBuilder, EventKind, Handler, HandlerError,
    HandlerRegistry, Outcome, RequestOptions, RequestState, ResultCode, TypedResponse,
};
pub use error::DispatchError;
pub use ledger::{Completion, LedgerError, PendingRequestLedger};
pub use protocol::{
    negotiate, CodecError, DataTransferRequest, DataTransferResponse, DataTransferStatus, ErrorCode,
    ErrorMessage, HeartbeatRequest, HeartbeatResponse, Message, MessageCodec, OcppCodec, Operation,
    Payload, Request, Response, Subprotocol, WireFormat,
};
pub use routing::{Reachability, Resolution, RoutingTable, Via};
pub use signing::{NoSigning, Signature, SigningError, SigningPolicy};
pub use source_route::{SourceRoute, SourceRouteError};
pub use transport::{ChannelTransport, LinkEnd, SendResult, Transport};
pub use types::{ConnectionHandle, Direction, NodeId, RequestId};

// Re-exported for callers passing cancellation to `Dispatcher::send`
pub use tokio_util::sync::CancellationToken;
