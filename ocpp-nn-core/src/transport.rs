//! Transport contract
//!
//! The core never owns sockets. It hands encoded frames to a [`Transport`]
//! together with a connection handle, and the transport feeds inbound frames
//! back through [`Dispatcher::attach_connection`](crate::Dispatcher::attach_connection).
//!
//! [`ChannelTransport`] is an in-memory transport over tokio channels, used
//! to build overlays inside one process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::negotiation::Subprotocol;
use crate::types::{ConnectionHandle, NodeId};

/// Frames buffered per direction of an in-memory link
const LINK_CAPACITY: usize = 256;

/// Result of handing bytes to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Failed { reason: String },
}

impl SendResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        SendResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendResult::Sent => write!(f, "sent"),
            SendResult::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Writes frames to live connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_bytes(&self, connection: &ConnectionHandle, bytes: Vec<u8>) -> SendResult;
}

/// One side of an in-memory link
#[derive(Debug)]
pub struct LinkEnd {
    /// Handle this side sends on
    pub handle: ConnectionHandle,
    /// Node on the other side
    pub peer: NodeId,
    /// Frames sent by the other side
    pub incoming: mpsc::Receiver<Vec<u8>>,
}

/// In-memory transport
///
/// Every link has two handles; bytes sent on one handle arrive on the
/// `incoming` receiver of the other side.
#[derive(Debug)]
pub struct ChannelTransport {
    next_id: AtomicU64,
    outboxes: DashMap<u64, mpsc::Sender<Vec<u8>>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            outboxes: DashMap::new(),
        }
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `client` to `server` over `subprotocol`
    ///
    /// Returns the client's end first. The client opened the link, so it
    /// sees the connection as outbound and the server as inbound.
    pub fn link(&self, client: &NodeId, server: &NodeId, subprotocol: Subprotocol) -> (LinkEnd, LinkEnd) {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let server_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (to_server, server_incoming) = mpsc::channel(LINK_CAPACITY);
        let (to_client, client_incoming) = mpsc::channel(LINK_CAPACITY);
        self.outboxes.insert(client_id, to_server);
        self.outboxes.insert(server_id, to_client);

        debug!(client = %client, server = %server, subprotocol = %subprotocol, "Link opened");

        (
            LinkEnd {
                handle: ConnectionHandle::new(client_id, server.as_str(), subprotocol.clone()),
                peer: server.clone(),
                incoming: client_incoming,
            },
            LinkEnd {
                handle: ConnectionHandle::new(server_id, client.as_str(), subprotocol),
                peer: client.clone(),
                incoming: server_incoming,
            },
        )
    }

    /// Stop delivering frames sent on `connection_id`
    pub fn close(&self, connection_id: u64) -> bool {
        self.outboxes.remove(&connection_id).is_some()
    }

    pub fn is_open(&self, connection_id: u64) -> bool {
        self.outboxes.contains_key(&connection_id)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_bytes(&self, connection: &ConnectionHandle, bytes: Vec<u8>) -> SendResult {
        // Clone the sender so no shard guard is held across the await
        let outbox = match self.outboxes.get(&connection.id) {
            Some(entry) => entry.value().clone(),
            None => return SendResult::failed(format!("connection {} is closed", connection.id)),
        };

        match outbox.send(bytes).await {
            Ok(()) => SendResult::Sent,
            Err(_) => {
                warn!(connection = %connection, "Peer hung up");
                self.outboxes.remove(&connection.id);
                SendResult::failed(format!("connection {} peer hung up", connection.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_delivers_both_ways() {
        let transport = ChannelTransport::new();
        let (mut client, mut server) =
            transport.link(&"CS001".into(), &"CSMS".into(), Subprotocol::default());

        assert_eq!(client.peer, NodeId::from("CSMS"));
        assert_eq!(server.handle.remote, "CS001");
        assert_ne!(client.handle.id, server.handle.id);

        assert!(transport.send_bytes(&client.handle, b"ping".to_vec()).await.is_sent());
        assert_eq!(server.incoming.recv().await.unwrap(), b"ping");

        assert!(transport.send_bytes(&server.handle, b"pong".to_vec()).await.is_sent());
        assert_eq!(client.incoming.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_send_on_closed_connection_fails() {
        let transport = ChannelTransport::new();
        let (client, server) = transport.link(&"A".into(), &"B".into(), Subprotocol::default());

        assert!(transport.close(client.handle.id));
        assert!(!transport.is_open(client.handle.id));
        assert!(matches!(
            transport.send_bytes(&client.handle, vec![1]).await,
            SendResult::Failed { .. }
        ));

        drop(client);
        let result = transport.send_bytes(&server.handle, vec![1]).await;
        assert!(!result.is_sent());
        assert!(!transport.is_open(server.handle.id));
    }
}
