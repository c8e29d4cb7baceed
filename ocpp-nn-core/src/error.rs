//! Error types surfaced to callers
//!
//! Protocol failures reachable from a send are reported as outcomes, not as
//! errors. `DispatchError` is reserved for caller contract violations.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::types::RequestId;

pub use crate::config::ConfigError;
pub use crate::protocol::codec::CodecError;
pub use crate::signing::SigningError;
pub use crate::source_route::SourceRouteError;

/// Caller contract violations in [`Dispatcher::send`](crate::Dispatcher::send)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateRequestId(id) => DispatchError::DuplicateRequestId(id),
        }
    }
}
