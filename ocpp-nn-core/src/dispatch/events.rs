//! Observability events
//!
//! The dispatcher publishes one event per frame it writes. Subscribers
//! (loggers, metrics) receive them over a broadcast channel; a slow
//! subscriber lags and loses events instead of slowing the dispatcher.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::protocol::messages::{Message, Payload};
use crate::transport::SendResult;
use crate::types::{ConnectionHandle, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestSent,
    ResponseSent,
    RequestErrorSent,
    ResponseErrorSent,
}

impl EventKind {
    pub fn for_message(message: &Message) -> Self {
        match message {
            Message::Request(_) => EventKind::RequestSent,
            Message::Response(_) => EventKind::ResponseSent,
            Message::RequestError(_) => EventKind::RequestErrorSent,
            Message::ResponseError(_) => EventKind::ResponseErrorSent,
        }
    }
}

/// A frame was handed to the transport
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    /// Set for requests
    pub action: Option<String>,
    pub connection: ConnectionHandle,
    /// Message payload; error details for error messages
    pub payload: Payload,
    pub result: SendResult,
}

impl DispatchEvent {
    pub fn new(message: &Message, connection: &ConnectionHandle, result: SendResult) -> Self {
        let (action, payload) = match message {
            Message::Request(r) => (Some(r.action.clone()), r.payload.clone()),
            Message::Response(r) => (None, r.payload.clone()),
            Message::RequestError(e) | Message::ResponseError(e) => {
                (None, Payload::Json(e.details.clone()))
            }
        };

        Self {
            kind: EventKind::for_message(message),
            timestamp: Utc::now(),
            request_id: message.request_id().clone(),
            action,
            connection: connection.clone(),
            payload,
            result,
        }
    }
}

/// Broadcast channel of dispatch events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; events with no subscriber are dropped
    pub fn publish(&self, event: DispatchEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ErrorCode, ErrorMessage, Request};
    use crate::protocol::negotiation::Subprotocol;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new(8);
        bus.publish(DispatchEvent::new(
            &Message::Request(Request::new("X".into(), "Heartbeat", Payload::empty())),
            &ConnectionHandle::new(1, "X", Subprotocol::default()),
            SendResult::Sent,
        ));

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let request = Request::new("X".into(), "Reset", Payload::empty());
        let error = ErrorMessage::for_request(&request, ErrorCode::NotSupported, "nope")
            .with_details(json!({"reason": "test"}));
        bus.publish(DispatchEvent::new(
            &Message::RequestError(error),
            &ConnectionHandle::new(1, "X", Subprotocol::default()),
            SendResult::failed("closed"),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::RequestErrorSent);
        assert_eq!(event.request_id, request.request_id);
        assert_eq!(event.action, None);
        assert_eq!(event.payload, Payload::Json(json!({"reason": "test"})));
        assert!(!event.result.is_sent());
    }
}
