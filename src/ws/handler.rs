//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::lobby::{Admission, Lobby};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Per-connection outbound queue
const OUTBOUND_CAPACITY: usize = 256;

/// Time a new connection has to send its handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time the writer gets to flush after the reader stops
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let first = match timeout(HANDSHAKE_TIMEOUT, next_client_msg(&mut ws_stream)).await {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            debug!("Connection closed before handshake");
            return;
        }
        Err(_) => {
            warn!("Handshake timed out");
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_CAPACITY);
    let admission = match state.lobby.admit(first, outbound_tx.clone()) {
        Ok(admission) => admission,
        Err(e) => {
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(e.code(), e.to_string())).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    info!(client_id = %admission.client_id, role = %admission.role, "New WebSocket connection");

    let writer = tokio::spawn(write_loop(admission.client_id, ws_sink, outbound_rx));

    read_loop(&state.lobby, admission, ws_stream, &outbound_tx).await;

    // Removing the client drops the lobby's sender; ours goes next so the
    // writer drains what is queued and stops
    state.lobby.disconnect(admission.client_id).await;
    drop(outbound_tx);
    if timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        debug!(client_id = %admission.client_id, "Writer did not flush in time");
    }

    info!(client_id = %admission.client_id, "WebSocket connection closed");
}

/// Wait for the first text frame and parse it
async fn next_client_msg(ws_stream: &mut SplitStream<WebSocket>) -> Option<ClientMsg> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!(error = %e, "Failed to parse handshake");
                        None
                    }
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Reader loop: WebSocket -> lobby. Returns when the client must go.
async fn read_loop(
    lobby: &Lobby,
    admission: Admission,
    mut ws_stream: SplitStream<WebSocket>,
    outbound_tx: &mpsc::Sender<ServerMsg>,
) {
    let client_id = admission.client_id;
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(client_id = %client_id, "Rate limited inbound message");
                    continue;
                }

                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                        reject(client_id, outbound_tx, "malformed_message", e.to_string());
                        break;
                    }
                };

                if let Err(e) = lobby.handle(client_id, msg).await {
                    warn!(client_id = %client_id, role = %admission.role, error = %e, "Disconnecting client");
                    reject(client_id, outbound_tx, e.code(), e.to_string());
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, disconnecting");
                reject(client_id, outbound_tx, "malformed_message", "Binary frames are not supported");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Writer loop: lobby -> WebSocket
async fn write_loop(
    client_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(client_id = %client_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = ws_sink.close().await;
}

fn reject(client_id: Uuid, outbound_tx: &mpsc::Sender<ServerMsg>, code: &str, message: impl Into<String>) {
    if outbound_tx.try_send(ServerMsg::error(code, message)).is_err() {
        debug!(client_id = %client_id, "Could not queue rejection");
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
