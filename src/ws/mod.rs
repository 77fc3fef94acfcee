//! WebSocket session layer: one task per connection, owning the socket from
//! upgrade to close. Registration binds the connection to `(room_id,
//! peer_id)`; everything after that is routed through the dispatcher.

pub mod dispatcher;
pub mod messages;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

use dispatcher::{dispatch, register, Binding, DispatchOutcome};
use messages::ClientMessage;

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WRITER_CHANNEL_CAPACITY);

    // Single writer task: WebSocket frames on one connection cannot
    // interleave, so every outbound message — replies, relays, errors —
    // funnels through this channel.
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut binding: Option<Binding> = None;

    while let Some(item) = stream.next().await {
        let msg = match item {
            Ok(msg) => msg,
            Err(_) => break,
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        let message = match parsed {
            Ok(m) => m,
            Err(_) => {
                send_error(&tx, &AppError::InvalidRequest("invalid JSON envelope".to_string())).await;
                continue;
            }
        };

        match (&binding, message) {
            (None, ClientMessage::Register(req)) => match register(&state, req, tx.clone()).await {
                Ok((bound, reply, conflict)) => {
                    info!(room_id = %bound.room_id, peer_id = %bound.peer_id, "peer registered");
                    send(&tx, &reply).await;
                    if let Some(conflict) = conflict {
                        send(&tx, &conflict).await;
                    }
                    binding = Some(bound);
                }
                Err(e) => {
                    send_error(&tx, &e).await;
                    break;
                }
            },
            (None, _) => {
                send_error(&tx, &AppError::Unauthenticated).await;
            }
            (Some(bound), message) => match dispatch(&state, bound, message).await {
                Ok(DispatchOutcome::Reply(reply)) => send(&tx, &reply).await,
                Ok(DispatchOutcome::None) => {}
                Err(e) => send_error(&tx, &e).await,
            },
        }
    }

    if let Some(bound) = binding {
        cleanup(&state, &bound);
    }

    drop(tx);
    let _ = writer_task.await;
}

/// The janitor: runs synchronously with read-loop termination so a
/// reconnecting peer never races with its own cleanup.
fn cleanup(state: &AppState, binding: &Binding) {
    if let Some(outcome) = state.registry.leave(&binding.peer_id) {
        if outcome.was_admin {
            info!(room_id = %outcome.room_id, peer_id = %binding.peer_id, "admin disconnected, designation cleared");
        }
        if outcome.room_now_empty {
            info!(room_id = %outcome.room_id, "room emptied, registry entry removed");
        }
    } else {
        warn!(peer_id = %binding.peer_id, "cleanup for peer not found in registry");
    }
}

async fn send(tx: &mpsc::Sender<Message>, message: &messages::ServerMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text)).await;
        }
        Err(e) => warn!(error = %e, "failed to serialize outbound message"),
    }
}

async fn send_error(tx: &mpsc::Sender<Message>, error: &AppError) {
    let envelope = error.to_ws_envelope();
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = tx.send(Message::Text(text)).await;
    }
}
