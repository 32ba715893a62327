//! Live feed of published events for dashboards and tooling.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut feed = BroadcastStream::new(state.gateway.feed());

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = feed.next().await {
            let envelope = match item {
                Ok(envelope) => envelope,
                // The feed is best-effort; a lagging client just misses some.
                Err(err) => {
                    warn!(error = %err, "websocket client lagged behind the event feed");
                    continue;
                }
            };

            let frame = json!({
                "routing_key": envelope.routing_key,
                "payload": envelope.payload,
            });
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
