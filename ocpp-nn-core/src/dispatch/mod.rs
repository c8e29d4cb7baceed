//! Request/response dispatch
//!
//! - `dispatcher`: send, receive, forwarding and connection read loops
//! - `outcome`: typed outcomes of a send
//! - `events`: observability events published per written frame
//! - `handlers`: action to handler registry for inbound requests

pub mod dispatcher;
pub mod events;
pub mod handlers;
pub mod outcome;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use events::{DispatchEvent, EventBus, EventKind};
pub use handlers::{Handler, HandlerError, HandlerRegistry};
pub use outcome::{DispatchResult, Outcome, RequestOptions, RequestState, ResultCode, TypedResponse};
