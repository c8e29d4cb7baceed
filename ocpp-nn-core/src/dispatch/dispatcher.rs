//! Request/response dispatcher
//!
//! Outgoing requests go through encode, sign, resolve, register, send and
//! await. Inbound frames are decoded and either complete a pending request,
//! are handed to the handler registry, or are forwarded toward the next hop
//! when this node acts as a hub.
//!
//! ```text
//! send ──► encode ─► sign ─► resolve ─► register ─► write ─► await ─► Outcome
//!                                          ▲                   ▲
//! receive ─► decode ─► reply ──────────────┴─► ledger.complete ┘
//!                    ├► request ─► handler task ─► reply on arrival connection
//!                    └► not for us ─► forward to next hop
//! ```

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{DispatchEvent, EventBus};
use super::handlers::HandlerRegistry;
use super::outcome::{DispatchResult, Outcome, RequestOptions, RequestState, ResultCode, TypedResponse};
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::ledger::{Completion, PendingRequestLedger};
use crate::protocol::codec::{CodecError, MessageCodec, OcppCodec};
use crate::protocol::messages::{ErrorCode, ErrorMessage, Message, Payload, Request, Response};
use crate::protocol::negotiation::WireFormat;
use crate::protocol::operations::Operation;
use crate::routing::RoutingTable;
use crate::signing::{NoSigning, SigningPolicy};
use crate::source_route::SourceRoute;
use crate::transport::{LinkEnd, SendResult, Transport};
use crate::types::{ConnectionHandle, Direction, NodeId, RequestId};

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    request_signing: Arc<dyn SigningPolicy>,
    response_signing: Arc<dyn SigningPolicy>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            codec: Arc::new(OcppCodec),
            request_signing: Arc::new(NoSigning),
            response_signing: Arc::new(NoSigning),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Policy used by the typed send helpers
    pub fn with_request_signing(mut self, policy: Arc<dyn SigningPolicy>) -> Self {
        self.request_signing = policy;
        self
    }

    /// Policy applied to responses and errors this node sends
    pub fn with_response_signing(mut self, policy: Arc<dyn SigningPolicy>) -> Self {
        self.response_signing = policy;
        self
    }

    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            events: EventBus::new(self.config.event_capacity),
            config: self.config,
            routes: RoutingTable::new(),
            ledger: PendingRequestLedger::new(),
            handlers: HandlerRegistry::new(),
            codec: self.codec,
            transport: self.transport,
            request_signing: self.request_signing,
            response_signing: self.response_signing,
            connections: DashMap::new(),
        })
    }
}

/// Issues requests, correlates replies and serves inbound requests
pub struct Dispatcher {
    config: DispatcherConfig,
    routes: RoutingTable,
    ledger: PendingRequestLedger,
    handlers: HandlerRegistry,
    codec: Arc<dyn MessageCodec>,
    transport: Arc<dyn Transport>,
    request_signing: Arc<dyn SigningPolicy>,
    response_signing: Arc<dyn SigningPolicy>,
    events: EventBus,
    /// Read loops of attached connections
    connections: DashMap<u64, CancellationToken>,
}

/// Identity of one send, for building its outcome
struct Attempt {
    request_id: RequestId,
    action: String,
    destination: NodeId,
}

impl Attempt {
    fn new(request: &Request) -> Self {
        Self {
            request_id: request.request_id.clone(),
            action: request.action.clone(),
            destination: request.destination.last(),
        }
    }

    fn outcome(&self, state: RequestState, result: DispatchResult) -> Outcome {
        Outcome::new(
            self.request_id.clone(),
            self.action.clone(),
            self.destination.clone(),
            state,
            result,
        )
    }
}

/// Removes a registered request from the ledger unless disarmed
///
/// Covers every exit after registration: early returns, panics and a caller
/// dropping the send future.
struct PendingGuard<'a> {
    ledger: &'a PendingRequestLedger,
    request_id: RequestId,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(ledger: &'a PendingRequestLedger, request_id: RequestId) -> Self {
        Self {
            ledger,
            request_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.ledger.take(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Pending request abandoned");
        }
    }
}

impl Dispatcher {
    pub fn builder(config: DispatcherConfig, transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder::new(config, transport)
    }

    /// Dispatcher with the default codec and no signing
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        DispatcherBuilder::new(config, transport).build()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn ledger(&self) -> &PendingRequestLedger {
        &self.ledger
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send `request` and wait for its outcome
    ///
    /// Every protocol failure is reported in the returned [`Outcome`]. The
    /// only error is a request id that is already pending.
    pub async fn send(
        &self,
        request: Request,
        signing: &dyn SigningPolicy,
        format: WireFormat,
        cancel: Option<CancellationToken>,
    ) -> Result<Outcome, DispatchError> {
        let started = Instant::now();
        let attempt = Attempt::new(&request);

        let result = AssertUnwindSafe(self.send_inner(request, signing, format, cancel))
            .catch_unwind()
            .await;

        let mut outcome = match result {
            Ok(outcome) => outcome?,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    request_id = %attempt.request_id,
                    action = %attempt.action,
                    reason = %reason,
                    "Send panicked"
                );
                attempt.outcome(
                    RequestState::Faulted,
                    DispatchResult::new(ResultCode::ExceptionOccurred, reason),
                )
            }
        };

        outcome.runtime = started.elapsed();
        Ok(outcome)
    }

    async fn send_inner(
        &self,
        mut request: Request,
        signing: &dyn SigningPolicy,
        format: WireFormat,
        cancel: Option<CancellationToken>,
    ) -> Result<Outcome, DispatchError> {
        let attempt = Attempt::new(&request);

        if attempt.destination.is_zero() {
            warn!(request_id = %attempt.request_id, action = %attempt.action, "Request has no destination");
            return Ok(attempt.outcome(
                RequestState::Unreachable,
                DispatchResult::new(ResultCode::Unreachable, "request has no destination"),
            ));
        }

        let payload = match self.codec.encode_payload(&request.payload, format) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(request_id = %attempt.request_id, error = %e, "Failed to encode payload");
                return Ok(attempt.outcome(
                    RequestState::EncodingFailed,
                    DispatchResult::new(ResultCode::EncodingError, e.to_string()),
                ));
            }
        };

        request.signatures = match signing.sign(&request.action, &payload) {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(request_id = %attempt.request_id, error = %e, "Signing rejected");
                return Ok(attempt.outcome(
                    RequestState::SignatureRejected,
                    DispatchResult::new(ResultCode::SignatureError, e.to_string()),
                ));
            }
        };

        let Some((route, connection)) = self.next_hop(&request.destination) else {
            warn!(
                request_id = %attempt.request_id,
                destination = %request.destination,
                "Destination unreachable"
            );
            return Ok(attempt.outcome(
                RequestState::Unreachable,
                DispatchResult::new(
                    ResultCode::Unreachable,
                    format!("no route to {}", request.destination.next()),
                ),
            ));
        };

        if !connection.subprotocol.accepts(format) {
            warn!(request_id = %attempt.request_id, connection = %connection, format = %format, "Format not accepted");
            let mut outcome = attempt.outcome(
                RequestState::EncodingFailed,
                DispatchResult::new(
                    ResultCode::EncodingError,
                    format!("{} does not accept {} frames", connection.subprotocol, format),
                ),
            );
            outcome.connection = Some(connection);
            return Ok(outcome);
        }

        request.destination = route;
        if request.network_path.is_empty() {
            request.network_path = SourceRoute::to(self.config.node_id.clone());
        }

        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        let deadline = Instant::now() + timeout;
        let receiver = self.ledger.register(
            attempt.request_id.clone(),
            &attempt.action,
            attempt.destination.clone(),
            deadline,
        )?;
        let mut guard = PendingGuard::new(&self.ledger, attempt.request_id.clone());

        let message = Message::Request(request);
        let bytes = match self.codec.encode(&message, format) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(request_id = %attempt.request_id, error = %e, "Failed to encode frame");
                return Ok(attempt.outcome(
                    RequestState::EncodingFailed,
                    DispatchResult::new(ResultCode::EncodingError, e.to_string()),
                ));
            }
        };

        if let SendResult::Failed { reason } = self.write(&connection, &message, bytes).await {
            let mut outcome = attempt.outcome(
                RequestState::SendFailed,
                DispatchResult::new(ResultCode::SendFailed, reason),
            );
            outcome.connection = Some(connection);
            return Ok(outcome);
        }

        debug!(
            request_id = %attempt.request_id,
            action = %attempt.action,
            route = %message.destination(),
            connection = %connection,
            "Request sent"
        );

        let completion = self
            .await_completion(&attempt.request_id, receiver, deadline, cancel)
            .await;
        guard.disarm();

        let mut outcome = classify(&attempt, completion, timeout);
        outcome.connection = Some(connection);
        Ok(outcome)
    }

    /// Wait for the first of reply, deadline and cancellation
    ///
    /// The ledger entry is removed exactly once. If the deadline or the
    /// cancellation fires but someone else already removed the entry, the
    /// completion they delivered wins.
    async fn await_completion(
        &self,
        request_id: &RequestId,
        mut receiver: oneshot::Receiver<Completion>,
        deadline: Instant,
        cancel: Option<CancellationToken>,
    ) -> Completion {
        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let fired = if Instant::now() >= deadline {
            Completion::TimedOut
        } else {
            tokio::select! {
                biased;
                completion = &mut receiver => {
                    return completion.unwrap_or(Completion::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => Completion::TimedOut,
                _ = cancelled => Completion::Cancelled,
            }
        };

        if self.ledger.take(request_id).is_some() {
            if matches!(fired, Completion::TimedOut) {
                warn!(request_id = %request_id, "Request timed out");
            } else {
                info!(request_id = %request_id, "Request cancelled");
            }
            return fired;
        }

        receiver.await.unwrap_or(fired)
    }

    /// Send a typed operation with the configured request signing policy
    pub async fn send_operation<O: Operation>(
        &self,
        destination: impl Into<NodeId>,
        operation: O,
        options: RequestOptions,
    ) -> Result<TypedResponse<O::Response>, DispatchError> {
        let started = Instant::now();
        let request_id = options.request_id.clone().unwrap_or_default();

        let payload = match Payload::json(&operation) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(TypedResponse {
                    request_id,
                    result: DispatchResult::new(ResultCode::EncodingError, e.to_string()),
                    body: None,
                    runtime: started.elapsed(),
                })
            }
        };

        let mut request = Request::new(destination.into(), O::ACTION, payload).with_request_id(request_id);
        if let Some(route) = options.route {
            request = request.with_route(route);
        }
        if let Some(timeout) = options.timeout {
            request = request.with_timeout(timeout);
        }
        let format = options.format.unwrap_or(self.config.default_format);
        let signing = options
            .signing
            .unwrap_or_else(|| Arc::clone(&self.request_signing));

        let outcome = self.send(request, signing.as_ref(), format, options.cancel).await?;
        let Outcome {
            request_id,
            result,
            response,
            connection,
            reply_connection,
            runtime,
            ..
        } = outcome;

        let (result, body) = match response {
            Some(response) if result.is_ok() => match response.parse_payload::<O::Response>() {
                Ok(body) => (result, Some(body)),
                Err(e) => {
                    let description = format!("invalid {} response: {}", O::ACTION, e);
                    warn!(request_id = %request_id, reason = %description, "Rejecting response");
                    if let Some(connection) = reply_connection.or(connection) {
                        let error = ErrorMessage::for_response(
                            &response,
                            ErrorCode::FormatViolation,
                            description.clone(),
                        );
                        self.send_reply(&connection, Message::ResponseError(error), O::ACTION)
                            .await;
                    }
                    (DispatchResult::new(ResultCode::FormationViolation, description), None)
                }
            },
            _ => (result, None),
        };

        Ok(TypedResponse {
            request_id,
            result,
            body,
            runtime,
        })
    }

    /// Connection and full source route toward `route.next()`
    ///
    /// Hubs found while resolving are prepended so every hop can strip
    /// itself from the route.
    fn next_hop(&self, route: &SourceRoute) -> Option<(SourceRoute, ConnectionHandle)> {
        let next = route.next();

        let (mut hops, connection) = match self.routes.resolve(&next) {
            Some(resolution) if resolution.connection().is_some() => {
                let hops: Vec<NodeId> = resolution.hubs.iter().rev().cloned().collect();
                (hops, resolution.connection()?.clone())
            }
            resolution => {
                if let Some(resolution) = resolution {
                    debug!(
                        destination = %next,
                        loop_detected = resolution.loop_detected,
                        "Route ends at a hub without connection"
                    );
                }
                self.upstream_hop(&next)?
            }
        };

        hops.extend(route.hops().iter().cloned());
        Some((SourceRoute::from_hops(hops), connection))
    }

    /// Route through the default upstream when fallback is enabled
    fn upstream_hop(&self, destination: &NodeId) -> Option<(Vec<NodeId>, ConnectionHandle)> {
        let upstream = &self.config.default_upstream;
        if !self.config.upstream_fallback || destination == upstream {
            return None;
        }

        let resolution = self.routes.resolve(upstream)?;
        let connection = resolution.connection()?.clone();
        let mut hops: Vec<NodeId> = resolution.hubs.iter().rev().cloned().collect();
        hops.push(upstream.clone());

        debug!(destination = %destination, upstream = %upstream, "Falling back to upstream route");
        Some((hops, connection))
    }

    async fn write(&self, connection: &ConnectionHandle, message: &Message, bytes: Vec<u8>) -> SendResult {
        let result = self.transport.send_bytes(connection, bytes).await;
        if let SendResult::Failed { reason } = &result {
            warn!(
                request_id = %message.request_id(),
                kind = message.kind(),
                connection = %connection,
                reason = %reason,
                "Transport send failed"
            );
        }
        self.events
            .publish(DispatchEvent::new(message, connection, result.clone()));
        result
    }

    /// Sign and write a reply originating at this node
    async fn send_reply(&self, connection: &ConnectionHandle, message: Message, action: &str) -> SendResult {
        let format = connection.subprotocol.format();
        let destination = message.destination().clone();
        let origin = SourceRoute::to(self.config.node_id.clone());
        let message = message.with_routing(destination.clone(), origin.clone());

        let (message, bytes) = match self.frame_reply(message.clone(), format, action) {
            Ok(framed) => framed,
            Err(reason) => {
                error!(
                    request_id = %message.request_id(),
                    kind = message.kind(),
                    reason = %reason,
                    "Failed to frame reply"
                );
                let Message::Response(response) = &message else {
                    return SendResult::failed(reason);
                };
                let fallback = ErrorMessage::new(
                    response.request_id.clone(),
                    ErrorCode::InternalError,
                    reason,
                    destination.clone(),
                );
                let fallback = Message::RequestError(fallback).with_routing(destination, origin);
                match self.frame_reply(fallback, format, action) {
                    Ok(framed) => framed,
                    Err(reason) => return SendResult::failed(reason),
                }
            }
        };

        self.write(connection, &message, bytes).await
    }

    fn frame_reply(&self, message: Message, format: WireFormat, action: &str) -> Result<(Message, Vec<u8>), String> {
        let signable = match &message {
            Message::Request(r) => self.codec.encode_payload(&r.payload, format),
            Message::Response(r) => self.codec.encode_payload(&r.payload, format),
            Message::RequestError(e) | Message::ResponseError(e) => {
                serde_json::to_vec(&e.details).map_err(CodecError::from)
            }
        }
        .map_err(|e| e.to_string())?;

        let signatures = self
            .response_signing
            .sign(action, &signable)
            .map_err(|e| e.to_string())?;
        let message = message.with_signatures(signatures);
        let bytes = self.codec.encode(&message, format).map_err(|e| e.to_string())?;
        Ok((message, bytes))
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Decode a frame read from `connection` and process it
    pub async fn receive(self: &Arc<Self>, connection: &ConnectionHandle, bytes: &[u8]) {
        match self.codec.decode(bytes, connection.subprotocol.format()) {
            Ok(message) => self.receive_message(connection, message).await,
            Err(CodecError::MalformedRequest { request_id, reason }) => {
                warn!(request_id = %request_id, connection = %connection, reason = %reason, "Malformed request");
                let error = ErrorMessage::new(
                    request_id,
                    ErrorCode::FormatViolation,
                    reason,
                    SourceRoute::empty(),
                );
                self.send_reply(connection, Message::RequestError(error), "").await;
            }
            Err(e) => {
                warn!(connection = %connection, error = %e, "Dropping undecodable frame");
            }
        }
    }

    /// Process a decoded message that arrived on `connection`
    pub async fn receive_message(self: &Arc<Self>, connection: &ConnectionHandle, message: Message) {
        let route = message.destination();
        let final_destination = route.last();
        let local = route.is_empty()
            || final_destination == self.config.node_id
            || final_destination.is_broadcast();

        if !local {
            self.forward(connection, message).await;
            return;
        }

        let request_id = message.request_id().clone();
        let (completed, kind) = match message {
            Message::Request(request) => {
                self.spawn_handler(connection.clone(), request);
                return;
            }
            Message::Response(response) => (
                self.ledger.complete(
                    &request_id,
                    Completion::Response {
                        response,
                        connection: Some(connection.clone()),
                    },
                ),
                "response",
            ),
            Message::RequestError(error) => (
                self.ledger.complete(&request_id, Completion::RequestError(error)),
                "request error",
            ),
            Message::ResponseError(error) => (
                self.ledger.complete(&request_id, Completion::ResponseError(error)),
                "response error",
            ),
        };

        if !completed {
            warn!(request_id = %request_id, kind, connection = %connection, "Unmatched reply dropped");
        }
    }

    /// Relay a message addressed to another node
    async fn forward(&self, connection: &ConnectionHandle, message: Message) {
        let me = &self.config.node_id;
        let request_id = message.request_id().clone();

        if !self.config.forward_messages {
            warn!(request_id = %request_id, route = %message.destination(), "Not a hub, dropping message");
            return;
        }
        if message.network_path().contains(me) {
            warn!(request_id = %request_id, path = %message.network_path(), "Message looped back, dropping");
            return;
        }

        let mut route = message.destination().clone();
        if route.next() == *me {
            route = route.remove_first();
        }
        let path = message.network_path().with_hop(me.clone());

        let Some((route, target)) = self.next_hop(&route) else {
            warn!(request_id = %request_id, route = %route, "No route to forward message");
            return;
        };

        let format = target.subprotocol.format();
        let message = message.with_routing(route, path);
        let bytes = match self.codec.encode(&message, format) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(request_id = %request_id, target = %target, error = %e, "Cannot re-encode for next hop");
                return;
            }
        };

        debug!(
            request_id = %request_id,
            kind = message.kind(),
            from = %connection,
            to = %target,
            "Forwarding"
        );
        self.write(&target, &message, bytes).await;
    }

    fn spawn_handler(self: &Arc<Self>, connection: ConnectionHandle, request: Request) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.handle_request(connection, request).await;
        });
    }

    async fn handle_request(&self, connection: ConnectionHandle, request: Request) {
        let action = request.action.clone();

        let reply = match self.handlers.get(&action) {
            None => {
                debug!(request_id = %request.request_id, action = %action, "No handler registered");
                Message::RequestError(ErrorMessage::for_request(
                    &request,
                    ErrorCode::NotImplemented,
                    format!("no handler for {}", action),
                ))
            }
            Some(handler) => {
                match AssertUnwindSafe(handler.handle(request.clone())).catch_unwind().await {
                    Ok(Ok(payload)) => Message::Response(Response::to(&request, payload)),
                    Ok(Err(e)) => Message::RequestError(
                        ErrorMessage::for_request(&request, e.code, e.description).with_details(e.details),
                    ),
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!(request_id = %request.request_id, action = %action, reason = %reason, "Handler panicked");
                        Message::RequestError(ErrorMessage::for_request(
                            &request,
                            ErrorCode::InternalError,
                            "handler failed",
                        ))
                    }
                }
            }
        };

        self.send_reply(&connection, reply, &action).await;
    }

    // ========================================================================
    // Connections and maintenance
    // ========================================================================

    /// Register a live connection to `peer` and spawn its read loop
    ///
    /// The loop ends when the transport closes `incoming` or the connection
    /// is detached; either way its route is removed.
    pub fn attach_connection(
        self: &Arc<Self>,
        peer: NodeId,
        connection: ConnectionHandle,
        direction: Direction,
        mut incoming: mpsc::Receiver<Vec<u8>>,
    ) -> JoinHandle<()> {
        self.routes.add_connection(
            peer.clone(),
            connection.clone(),
            direction,
            self.config.connection_priority,
        );

        let token = CancellationToken::new();
        self.connections.insert(connection.id, token.clone());
        info!(peer = %peer, connection = %connection, "Connection attached");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = incoming.recv() => match frame {
                        Some(bytes) => this.receive(&connection, &bytes).await,
                        None => break,
                    },
                }
            }

            this.connections.remove(&connection.id);
            this.routes.remove_connection(connection.id);
            info!(peer = %peer, connection = %connection, "Connection closed");
        })
    }

    /// Attach one end of an in-memory link
    pub fn attach_link(self: &Arc<Self>, end: LinkEnd, direction: Direction) -> JoinHandle<()> {
        self.attach_connection(end.peer, end.handle, direction, end.incoming)
    }

    /// Stop reading from a connection and drop its routes
    pub fn detach_connection(&self, connection_id: u64) -> usize {
        if let Some((_, token)) = self.connections.remove(&connection_id) {
            token.cancel();
        }
        self.routes.remove_connection(connection_id)
    }

    /// Periodically time out overdue requests and drop expired routes
    ///
    /// The task ends once the dispatcher is dropped.
    pub fn spawn_timeout_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(this) = dispatcher.upgrade() else {
                    break;
                };

                let expired = this.ledger.expire_overdue(Instant::now());
                let stale = this.routes.remove_expired(Utc::now());
                if !expired.is_empty() || stale > 0 {
                    debug!(requests = expired.len(), routes = stale, "Sweep");
                }
            }
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("node_id", &self.config.node_id)
            .field("routes", &self.routes.len())
            .field("pending", &self.ledger.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

fn classify(attempt: &Attempt, completion: Completion, timeout: Duration) -> Outcome {
    match completion {
        Completion::Response { response, connection } => {
            let mut outcome = attempt.outcome(RequestState::Responded, DispatchResult::ok());
            outcome.response = Some(response);
            outcome.reply_connection = connection;
            outcome
        }
        Completion::RequestError(error) => {
            let result = DispatchResult::new(ResultCode::RequestError(error.error_code), error.description.clone())
                .with_details(error.details.clone());
            let mut outcome = attempt.outcome(RequestState::RequestErrored, result);
            outcome.error = Some(error);
            outcome
        }
        Completion::ResponseError(error) => {
            let result = DispatchResult::new(ResultCode::FormationViolation, error.description.clone())
                .with_details(error.details.clone());
            let mut outcome = attempt.outcome(RequestState::ResponseErrored, result);
            outcome.error = Some(error);
            outcome
        }
        Completion::TimedOut => attempt.outcome(
            RequestState::TimedOut,
            DispatchResult::new(ResultCode::Timeout, format!("no reply within {:?}", timeout)),
        ),
        Completion::Cancelled => attempt.outcome(
            RequestState::Cancelled,
            DispatchResult::new(ResultCode::Cancelled, "request cancelled"),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
