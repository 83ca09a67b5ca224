//! Axum WebSocket route wiring (C4's external interface).
//!
//! Grounded on the upgrade/read-loop shape of a WS handler: one task reads
//! client frames and feeds [`ProgressBus::handle_client_message`], a second
//! drains the per-connection event channel and writes frames out, and a
//! heartbeat timer closes connections that miss `ping_timeout` pongs.

use crate::bus::ProgressBus;
use crate::event::{ClientMessage, ErrorResponse};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusState {
    pub bus: Arc<ProgressBus>,
    pub heartbeat: HeartbeatSettings,
}

/// Build the `/ws` + `/healthz` router for the progress bus.
pub fn router(state: BusState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz(State(state): State<BusState>) -> impl IntoResponse {
    format!("ok: {} connections", state.bus.connection_count())
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<BusState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BusState) {
    // Connections register as "anonymous" until a `subscribe` action binds
    // them to a `user_id` — spec §4.4 doesn't mandate a connect-time
    // handshake, only that the bus can route by user_id thereafter.
    let Some((connection_id, mut event_rx)) = state.bus.register("anonymous") else {
        warn!("connection rejected: bus at max_connections capacity");
        reject_at_capacity(socket).await;
        return;
    };
    let (ws_sink, mut ws_stream) = socket.split();
    let ws_sink = Arc::new(tokio::sync::Mutex::new(ws_sink));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let write_sink = ws_sink.clone();
    let write_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if write_sink.lock().await.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let bus = state.bus.clone();
    let heartbeat = state.heartbeat;
    let heartbeat_bus = bus.clone();
    let heartbeat_connection_id = connection_id;
    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat.ping_interval).await;
            heartbeat_bus.handle_client_message(
                heartbeat_connection_id,
                ClientMessage {
                    action: crate::event::ClientAction::Ping,
                    callback_id: None,
                    proceed: None,
                    feedback: None,
                    user_id: None,
                    task_id: None,
                },
            ).ok();
            match tokio::time::timeout(heartbeat.ping_timeout, pong_rx.recv()).await {
                Ok(Some(())) => continue,
                _ => {
                    warn!(connection_id = %heartbeat_connection_id, "ping timeout, closing connection");
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(client_msg) => {
                        if matches!(client_msg.action, crate::event::ClientAction::Ping) {
                            let _ = pong_tx.send(());
                        }
                        if let Err(err) = bus.handle_client_message(connection_id, client_msg) {
                            send_error(&ws_sink, err).await;
                        }
                    }
                    Err(_) => send_error(&ws_sink, ErrorResponse::invalid_json()).await,
                }
            }
            Message::Pong(_) => {
                let _ = pong_tx.send(());
            }
            Message::Close(_) => {
                debug!(connection_id = %connection_id, "client closed connection");
                break;
            }
            _ => {}
        }
    }

    bus.deregister(connection_id);
    heartbeat_task.abort();
    write_task.abort();
}

/// Sends the bare error shape then closes, for a connection refused before
/// it was ever registered with the bus.
async fn reject_at_capacity(mut socket: WebSocket) {
    if let Ok(text) = serde_json::to_string(&ErrorResponse::at_capacity()) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

type WsSink = futures::stream::SplitSink<WebSocket, Message>;

/// Error replies go out on the bare wire shape `{"error": "..."}` (spec
/// §6), not wrapped in the event envelope — written directly to the
/// socket rather than routed through the bus.
async fn send_error(sink: &Arc<tokio::sync::Mutex<WsSink>>, err: ErrorResponse) {
    if let Ok(text) = serde_json::to_string(&err) {
        let _ = sink.lock().await.send(Message::Text(text.into())).await;
    }
}
