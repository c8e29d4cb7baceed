//! Pending request ledger
//!
//! Tracks requests awaiting a correlated reply. An entry is removed exactly
//! once: by a reply, a timeout, a cancellation or a failed send. Removal from
//! the map is the complete-once guard; whoever removes the entry owns its
//! completion slot.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::protocol::messages::{ErrorMessage, Response};
use crate::types::{ConnectionHandle, NodeId, RequestId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),
}

/// How a pending request was completed
#[derive(Debug, Clone)]
pub enum Completion {
    Response {
        response: Response,
        /// Connection the response arrived on
        connection: Option<ConnectionHandle>,
    },
    RequestError(ErrorMessage),
    ResponseError(ErrorMessage),
    TimedOut,
    Cancelled,
}

impl Completion {
    pub fn kind(&self) -> &'static str {
        match self {
            Completion::Response { .. } => "response",
            Completion::RequestError(_) => "request error",
            Completion::ResponseError(_) => "response error",
            Completion::TimedOut => "timeout",
            Completion::Cancelled => "cancelled",
        }
    }
}

/// A request awaiting its reply
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub action: String,
    pub destination: NodeId,
    pub registered_at: Instant,
    pub deadline: Instant,
    slot: oneshot::Sender<Completion>,
}

impl PendingRequest {
    /// Signal the waiter. Returns false if the waiter is gone.
    fn complete(self, completion: Completion) -> bool {
        self.slot.send(completion).is_ok()
    }
}

/// Registry of in-flight requests keyed by request id
#[derive(Debug, Default)]
pub struct PendingRequestLedger {
    entries: DashMap<RequestId, PendingRequest>,
}

impl PendingRequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its completion is delivered on
    pub fn register(
        &self,
        request_id: RequestId,
        action: impl Into<String>,
        destination: NodeId,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<Completion>, LedgerError> {
        match self.entries.entry(request_id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateRequestId(request_id)),
            Entry::Vacant(entry) => {
                let (slot, receiver) = oneshot::channel();
                entry.insert(PendingRequest {
                    request_id,
                    action: action.into(),
                    destination,
                    registered_at: Instant::now(),
                    deadline,
                    slot,
                });
                Ok(receiver)
            }
        }
    }

    /// Remove and signal the entry for `request_id`
    ///
    /// Unknown ids are not an error: late or duplicate replies are expected.
    pub fn complete(&self, request_id: &RequestId, completion: Completion) -> bool {
        match self.entries.remove(request_id) {
            Some((_, pending)) => {
                debug!(
                    request_id = %request_id,
                    action = %pending.action,
                    outcome = completion.kind(),
                    "Pending request completed"
                );
                if !pending.complete(completion) {
                    debug!(request_id = %request_id, "Waiter already gone");
                }
                true
            }
            None => false,
        }
    }

    /// Signal cancellation to the waiter of `request_id`
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.complete(request_id, Completion::Cancelled)
    }

    /// Remove the entry without signalling; the caller decides the outcome
    pub fn take(&self, request_id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(request_id).map(|(_, pending)| pending)
    }

    /// Time out every entry whose deadline is at or before `now`
    pub fn expire_overdue(&self, now: Instant) -> Vec<RequestId> {
        let overdue: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for request_id in overdue {
            // Re-check under the shard lock: a reply may have won meanwhile
            if let Some((_, pending)) = self.entries.remove_if(&request_id, |_, p| p.deadline <= now) {
                warn!(
                    request_id = %request_id,
                    action = %pending.action,
                    destination = %pending.destination,
                    "Request timed out"
                );
                pending.complete(Completion::TimedOut);
                expired.push(request_id);
            }
        }

        expired
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
