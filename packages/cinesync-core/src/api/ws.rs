//! WebSocket gateway transport.
//!
//! One session per socket: a writer task drains the bounded outbox to the
//! wire while this handler parses inbound named events and routes them to
//! the coordinator. Closing the socket (or a forced cancel from outbox
//! overflow or shutdown) tears the session down and triggers room cleanup.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;

use crate::api::AppState;
use crate::room::protocol::ClientEvent;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (guard, mut outbox_rx) = state.sessions.register();
    let cancel = guard.cancel_token().clone();
    let session_id = guard.id().to_string();

    log::info!("[WS] New connection: {}", session_id);

    // Writer task: outbox -> wire. Ends when the outbox closes or the
    // socket rejects a write.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let Some(json) = event.to_json() else {
                log::error!("[WS] unserializable event dropped");
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let grace = Duration::from_millis(state.config.limits.post_connect_grace_ms);
    loop {
        tokio::select! {
            // Force-close: outbox overflow, shutdown, or kick.
            _ = cancel.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", session_id);
                break;
            }
            // Writer died: the socket is gone.
            _ = &mut send_task => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            // Joins arriving hot on the heels of the connect
                            // are held back; this absorbs reconnect storms
                            // while keeping the session's event order.
                            if matches!(event, ClientEvent::JoinRoom { .. }) {
                                let elapsed = guard.connected_at().elapsed();
                                if elapsed < grace {
                                    tokio::time::sleep(grace - elapsed).await;
                                }
                            }
                            state.coordinator.dispatch(&session_id, event).await;
                        }
                        Err(_) => {
                            log::debug!("[WS] unparseable event from {}", session_id);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }

    send_task.abort();
    state.coordinator.session_closed(&session_id).await;
    log::info!("[WS] Connection closed: {}", session_id);
    // SessionGuard drop unregisters the session.
}
