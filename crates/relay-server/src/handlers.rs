//! Connection handlers for the Relay server.
//!
//! This module handles the connection lifecycle: registering each
//! WebSocket in the registry, draining its outbound queue to the socket,
//! and dispatching inbound invocations.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use relay_core::{ConnectionId, DispatchError, Dispatcher, HandlerError, Hub, ParamKind, Registry};
use relay_protocol::{codec, Frame, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Open connections and their outbound queues.
    pub registry: Arc<Registry>,
    /// Broadcast fan-out over the registry.
    pub hub: Arc<Hub>,
    /// Handler table, built once at startup.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the chat handlers registered.
    ///
    /// # Errors
    ///
    /// Returns an error if handler registration fails.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let hub = Arc::new(Hub::new(registry.clone()));
        let dispatcher = build_dispatcher(hub.clone())?;

        Ok(Self {
            registry,
            hub,
            dispatcher,
            config,
        })
    }
}

/// Register the application handlers.
///
/// `SendMessage(user, message)` re-broadcasts as
/// `ReceiveMessage(user, message)` to every open connection.
fn build_dispatcher(hub: Arc<Hub>) -> Result<Dispatcher> {
    let dispatcher = Dispatcher::builder()
        .handle(
            "SendMessage",
            &[ParamKind::String, ParamKind::String],
            move |source, args| {
                let recipients = hub
                    .broadcast("ReceiveMessage", args.to_vec())
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                metrics::record_broadcast(recipients);
                debug!(connection = %source, recipients, "Chat message broadcast");
                Ok(())
            },
        )?
        .build();

    Ok(dispatcher)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    if state.registry.len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting connection");
        metrics::record_error("connection_limit");
        return;
    }

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Register: the registry assigns the id and owns the sender half of
    // the outbound queue; this task drains the receiver half.
    let (queue_tx, mut outbound) = mpsc::unbounded_channel();
    let connection_id = state.registry.register(queue_tx);

    debug!(connection = %connection_id, "WebSocket connected");

    // Send Connected handshake
    let connected = Frame::connected(connection_id.to_string(), PROTOCOL_VERSION.major);
    match codec::encode(&connected) {
        Ok(data) => {
            if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                error!(connection = %connection_id, "Failed to send Connected frame");
                state.registry.unregister(connection_id);
                return;
            }
        }
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to encode Connected frame");
            state.registry.unregister(connection_id);
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Drain the outbound queue to the socket
            maybe = outbound.recv() => {
                match maybe {
                    Some(payload) => {
                        metrics::record_message(payload.len(), "outbound");
                        if sender.send(Message::Binary(payload.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the hub evicted us after a send failure
                    None => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(
                                connection = %connection_id,
                                bytes = data.len(),
                                "Inbound message exceeds size limit, dropping"
                            );
                            metrics::record_error("message_too_large");
                            continue;
                        }

                        read_buffer.extend_from_slice(&data);
                        process_inbound(&state, connection_id, &mut read_buffer);
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                        process_inbound(&state, connection_id, &mut read_buffer);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: remove from the registry (idempotent if the hub already
    // evicted this connection)
    state.registry.unregister(connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch all complete frames buffered for a connection.
///
/// All failures are connection-local: they are reported back on the
/// sender's own outbound queue and never touch other connections.
fn process_inbound(state: &Arc<AppState>, connection_id: ConnectionId, read_buffer: &mut BytesMut) {
    let start = Instant::now();

    loop {
        let buffered = read_buffer.len();
        match codec::decode_from(read_buffer) {
            Ok(Some(frame)) => {
                metrics::record_message(buffered - read_buffer.len(), "inbound");
                handle_frame(state, connection_id, frame);
            }
            Ok(None) => break,
            Err(e) => {
                // Framing is lost; report and resync at the next message
                warn!(connection = %connection_id, error = %e, "Malformed payload");
                metrics::record_error("malformed_payload");
                report_error(
                    state,
                    connection_id,
                    &DispatchError::MalformedPayload(e),
                );
                read_buffer.clear();
                break;
            }
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Handle one decoded frame from a connection.
fn handle_frame(state: &Arc<AppState>, connection_id: ConnectionId, frame: Frame) {
    match frame {
        Frame::Invocation { target, args } => {
            if let Err(e) = state.dispatcher.dispatch(&target, &args, connection_id) {
                warn!(connection = %connection_id, target = %target, error = %e, "Dispatch failed");
                metrics::record_error(error_kind(&e));
                report_error(state, connection_id, &e);
            }
        }
        other => {
            warn!(
                connection = %connection_id,
                frame_type = ?other.frame_type(),
                "Unexpected frame type"
            );
        }
    }
}

/// Send a dispatch error back to the offending connection only.
fn report_error(state: &Arc<AppState>, connection_id: ConnectionId, e: &DispatchError) {
    let report = Frame::error(e.code(), e.to_string());
    if let Err(encode_err) = state.hub.send_to(connection_id, &report) {
        error!(connection = %connection_id, error = %encode_err, "Failed to encode error frame");
    }
}

fn error_kind(e: &DispatchError) -> &'static str {
    match e {
        DispatchError::MalformedPayload(_) => "malformed_payload",
        DispatchError::UnknownMethod(_) => "unknown_method",
        DispatchError::ArgumentMismatch { .. } => "argument_mismatch",
        DispatchError::Handler(_) => "handler",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_build_dispatcher_registers_chat_handler() {
        let registry = Arc::new(Registry::new());
        let hub = Arc::new(Hub::new(registry));
        let dispatcher = build_dispatcher(hub).unwrap();

        assert_eq!(dispatcher.targets(), vec!["SendMessage"]);
    }

    #[tokio::test]
    async fn test_send_message_flows_to_all_queues() {
        let config = Config::default();
        let state = AppState::new(config).unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = state.registry.register(tx1);
        let _c2 = state.registry.register(tx2);

        state
            .dispatcher
            .dispatch("SendMessage", &[json!("alice"), json!("hi")], c1)
            .unwrap();

        let expected = Frame::invocation("ReceiveMessage", vec![json!("alice"), json!("hi")]);
        for rx in [&mut rx1, &mut rx2] {
            let payload = rx.try_recv().unwrap();
            assert_eq!(codec::decode(&payload).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_dispatch_error_reported_to_sender_only() {
        let config = Config::default();
        let state = Arc::new(AppState::new(config).unwrap());

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = state.registry.register(tx1);
        let _c2 = state.registry.register(tx2);

        let frame = Frame::invocation("NoSuchMethod", vec![]);
        handle_frame(&state, c1, frame);

        let payload = rx1.try_recv().unwrap();
        assert!(matches!(
            codec::decode(&payload).unwrap(),
            Frame::Error {
                code: ErrorCode::UnknownMethod,
                ..
            }
        ));
        assert!(rx2.try_recv().is_err());
    }
}
