//! WebSocket transport for live subscribers

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use super::registry::SubscriberRegistry;
use crate::api::AppState;

/// Upgrade the connection and register it as a live subscriber
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Drive one connection until either side goes away.
///
/// Outbound events come from the registry channel. Inbound frames are
/// ignored apart from close. The subscriber is deregistered on exit.
async fn handle_socket(socket: WebSocket, registry: Arc<SubscriberRegistry>) {
    let (id, mut rx) = registry.register();
    tracing::info!(subscriber_id = id, subscribers = registry.len(), "Live subscriber connected");

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                tracing::debug!(subscriber_id = id, "Socket sink closed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(subscriber_id = id, error = %e, "Socket receive error");
                break;
            }
        }
    }

    registry.deregister(id);
    send_task.abort();
    tracing::info!(subscriber_id = id, "Live subscriber disconnected");
}
