//! WebSocket handler for live snapshot notifications.
//!
//! Each connection is told about every snapshot the record cache publishes
//! and can ask for the current one at any time.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};
use crate::SharedSession;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Sends the current snapshot summary
/// 3. Spawns a task to forward outgoing messages
/// 4. Processes incoming messages in a loop
/// 5. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    session: SharedSession,
    conn_manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = attach(&session, &conn_manager, tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    // Forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &session);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Register `sender` and queue the current snapshot summary as its first
/// message.
///
/// Snapshots are published while the cache is held, so doing both under the
/// cache lock keeps a newer version from reaching the client first.
pub fn attach(
    session: &SharedSession,
    conn_manager: &ConnectionManager,
    sender: mpsc::UnboundedSender<ServerMessage>,
) -> String {
    session.with_cache(|cache| {
        let conn_id = conn_manager.register(sender);
        conn_manager.send_to(&conn_id, ServerMessage::snapshot(&cache.snapshot()));
        conn_id
    })
}

/// Process a client message and return a server response.
pub fn process_message(text: &str, session: &SharedSession) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e));
        }
    };

    match client_msg {
        ClientMessage::Current { request_id } => {
            let snapshot = session.snapshot();
            ServerMessage::Snapshot {
                version: snapshot.version(),
                total: snapshot.len(),
                request_id,
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
