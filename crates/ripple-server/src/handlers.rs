//! Connection handlers for the Ripple server.
//!
//! This module handles the connection lifecycle: handshake, backlog replay,
//! registration in the live set, and the publish/broadcast loop.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use ripple_core::{
    recover, ConnectionId, ConnectionRegistry, IngestGate, IngestOutcome, MessageStore,
    StoredMessage,
};
use ripple_protocol::{codec, Frame};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The durable message log.
    pub store: MessageStore,
    /// Live connections eligible for broadcast.
    pub registry: Arc<ConnectionRegistry>,
    /// Dedup gate in front of the store.
    pub gate: IngestGate,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over an opened store.
    #[must_use]
    pub fn new(store: MessageStore, config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let gate = IngestGate::new(store.clone(), Arc::clone(&registry));
        Self {
            store,
            registry,
            gate,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store cannot be reached or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    // Storage must be reachable at startup; anything later degrades
    // per-operation instead.
    let store = MessageStore::open(
        &config.store.database_url,
        config.store.max_connections,
    )
    .await?;

    let state = Arc::new(AppState::new(store, config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Ripple server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the embedded client shell.
async fn index_handler() -> impl IntoResponse {
    Html(include_str!("../assets/index.html"))
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
///
/// Lifecycle: `Connect` handshake, `Connected` reply, backlog replay,
/// registration, then the live loop. Replay finishes before registration so
/// the connection cannot see a live broadcast ordered before its own replay.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Handshake: the first frame must be Connect.
    let Some((last_seen, resumed)) =
        read_connect(&connection_id, &mut receiver, &mut read_buffer).await
    else {
        return;
    };

    if send_frame(&mut sender, &Frame::connected(connection_id.as_str()))
        .await
        .is_err()
    {
        error!(connection = %connection_id, "Failed to send Connected frame");
        return;
    }

    // Per-connection outbox: the registry and the recovery replay both feed
    // it, this task drains it into the socket.
    let (outbox, mut deliveries) = mpsc::unbounded_channel::<Arc<StoredMessage>>();

    // Replay the backlog before going live. A resumed transport session lost
    // nothing, so the replay is skipped as a latency optimization only.
    if resumed {
        debug!(connection = %connection_id, "Resumed session, skipping replay");
    } else {
        match recover(&state.store, &outbox, last_seen).await {
            Ok(replayed) => {
                metrics::record_replayed(replayed);
                debug!(connection = %connection_id, last_seen, replayed, "Recovery complete");
            }
            Err(e) => {
                // Not fatal: the connection goes live with zero replayed.
                warn!(connection = %connection_id, error = %e, "Recovery failed, going live without replay");
                metrics::record_error("recovery");
            }
        }
    }

    state.registry.add(connection_id.clone(), outbox);

    // The client may have pipelined frames behind its Connect in the same
    // message; they are already sitting in the read buffer.
    if !drain_frames(&mut read_buffer, &connection_id, &state, &mut sender).await {
        state.registry.remove(&connection_id);
        debug!(connection = %connection_id, "WebSocket disconnected");
        return;
    }

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(state.config.heartbeat.interval_ms));
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut last_activity = Instant::now();

    // Message processing loop
    'conn: loop {
        tokio::select! {
            biased;

            // Drain the outbox (replayed and live messages alike)
            Some(message) = deliveries.recv() => {
                let frame = Frame::message(message.content.clone(), message.seq);
                if send_frame(&mut sender, &frame).await.is_err() {
                    break 'conn;
                }
            }

            // Periodic keepalive and zombie detection
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > timeout {
                    warn!(connection = %connection_id, "Heartbeat timeout");
                    break 'conn;
                }
                if send_frame(&mut sender, &Frame::ping()).await.is_err() {
                    break 'conn;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);

                        if !drain_frames(&mut read_buffer, &connection_id, &state, &mut sender)
                            .await
                        {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'conn;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'conn;
                    }
                }
            }
        }
    }

    // A broadcast already in flight may still land in the closed outbox;
    // that delivery is simply lost and recovery covers it on reconnect.
    state.registry.remove(&connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Wait for the client's Connect frame.
///
/// Returns the claimed recovery cursor and resume flag, or `None` if the
/// connection closed or violated the handshake.
async fn read_connect(
    connection_id: &ConnectionId,
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Option<(u64, bool)> {
    while let Some(msg) = receiver.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        read_buffer.extend_from_slice(&data);

        match codec::decode_from(read_buffer) {
            Ok(Some(Frame::Connect { last_seen, resumed })) => {
                debug!(connection = %connection_id, last_seen, resumed, "Handshake received");
                return Some((last_seen, resumed));
            }
            Ok(Some(other)) => {
                warn!(
                    connection = %connection_id,
                    frame_type = ?other.frame_type(),
                    "Expected Connect as first frame"
                );
                return None;
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Handshake protocol error");
                return None;
            }
        }
    }
    None
}

/// Decode and handle every complete frame currently buffered.
///
/// Returns `false` when the connection should be torn down.
async fn drain_frames(
    read_buffer: &mut BytesMut,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    loop {
        match codec::decode_from(read_buffer) {
            Ok(Some(frame)) => {
                if handle_frame(&frame, connection_id, state, sender)
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Protocol error");
                metrics::record_error("protocol");
                let _ = send_frame(sender, &Frame::error(1001, e.to_string())).await;
                return false;
            }
        }
    }
}

/// Handle a decoded frame from a live connection.
async fn handle_frame(
    frame: &Frame,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    match frame {
        Frame::Publish {
            content,
            client_offset,
        } => {
            debug!(connection = %connection_id, client_offset = %client_offset, "Publish");

            if content.len() > state.config.limits.max_message_size {
                warn!(
                    connection = %connection_id,
                    size = content.len(),
                    "Publish exceeds maximum message size"
                );
                metrics::record_error("oversized");
                send_frame(sender, &Frame::error(1009, "message too large")).await?;
                return Ok(());
            }

            match state.gate.ingest(client_offset, content).await {
                Ok(IngestOutcome::Accepted { message, delivered }) => {
                    metrics::record_persisted();
                    metrics::record_delivered(delivered);
                    debug!(
                        connection = %connection_id,
                        seq = message.seq,
                        delivered,
                        "Accepted"
                    );
                    send_frame(sender, &Frame::ack(client_offset)).await?;
                }
                Ok(IngestOutcome::Ignored) => {
                    // The first attempt already landed; re-ack so a client
                    // that lost the original ack converges.
                    metrics::record_duplicate();
                    send_frame(sender, &Frame::ack(client_offset)).await?;
                }
                Err(e) => {
                    // No ack and no broadcast; the client retries.
                    error!(connection = %connection_id, error = %e, "Publish failed");
                    metrics::record_error("store");
                }
            }
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(*timestamp)).await?;
        }

        Frame::Pong { .. } => {
            // Ignore pongs
        }

        Frame::Connect { .. } => {
            debug!(connection = %connection_id, "Connect frame (already connected)");
        }

        _ => {
            warn!(connection = %connection_id, frame_type = ?frame.frame_type(), "Unexpected frame type");
        }
    }

    Ok(())
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Serve the app on an ephemeral port over a throwaway database.
    async fn start_server(mut config: Config) -> (SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        config.store.database_url = format!("sqlite://{}/messages.db", dir.path().display());
        config.metrics.enabled = false;

        let store = MessageStore::open(&config.store.database_url, 5)
            .await
            .unwrap();
        let state = Arc::new(AppState::new(store, config));
        let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, dir)
    }

    async fn connect(addr: SocketAddr) -> ClientStream {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        ws
    }

    async fn next_frame(ws: &mut ClientStream) -> Frame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            if let WsMessage::Binary(data) = msg {
                return codec::decode(&data).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_publish_pipelined_with_connect_is_handled() {
        let (addr, _dir) = start_server(Config::default()).await;
        let mut ws = connect(addr).await;

        // Connect and Publish arrive in one WebSocket message.
        let mut buf = BytesMut::new();
        codec::encode_into(&Frame::connect(0), &mut buf).unwrap();
        codec::encode_into(&Frame::publish("hello", "key1"), &mut buf).unwrap();
        ws.send(WsMessage::Binary(buf.to_vec())).await.unwrap();

        assert!(matches!(next_frame(&mut ws).await, Frame::Connected { .. }));

        // The buffered publish is processed without any further client send.
        let mut got_ack = false;
        let mut got_message = false;
        while !(got_ack && got_message) {
            match next_frame(&mut ws).await {
                Frame::Ack { client_offset } => {
                    assert_eq!(client_offset, "key1");
                    got_ack = true;
                }
                Frame::Message { content, seq } => {
                    assert_eq!(content, "hello");
                    assert_eq!(seq, 1);
                    got_message = true;
                }
                Frame::Ping { .. } => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_publish_rejected() {
        let mut config = Config::default();
        config.limits.max_message_size = 16;
        let (addr, _dir) = start_server(config).await;
        let mut ws = connect(addr).await;

        ws.send(WsMessage::Binary(codec::encode(&Frame::connect(0)).unwrap().to_vec()))
            .await
            .unwrap();
        assert!(matches!(next_frame(&mut ws).await, Frame::Connected { .. }));

        let oversized = Frame::publish("x".repeat(32), "key-big");
        ws.send(WsMessage::Binary(codec::encode(&oversized).unwrap().to_vec()))
            .await
            .unwrap();

        loop {
            match next_frame(&mut ws).await {
                Frame::Error { code, .. } => {
                    assert_eq!(code, 1009);
                    break;
                }
                Frame::Ping { .. } => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }

        // The connection survives and a publish within the limit goes through.
        let small = Frame::publish("ok", "key-small");
        ws.send(WsMessage::Binary(codec::encode(&small).unwrap().to_vec()))
            .await
            .unwrap();

        loop {
            match next_frame(&mut ws).await {
                Frame::Ack { client_offset } => {
                    assert_eq!(client_offset, "key-small");
                    break;
                }
                Frame::Ping { .. } => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }
}
