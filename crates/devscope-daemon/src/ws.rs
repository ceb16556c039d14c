//! WebSocket handler streaming index changes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use devscope_core::{IndexEvent, TreeSnapshot};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsMessage {
    /// Whole tree, sent on connect and after the client fell behind
    Snapshot(TreeSnapshot),
    Change(IndexEvent),
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            true
        }
    }
}

async fn send_snapshot(sender: &mut SplitSink<WebSocket, Message>, state: &AppState) -> bool {
    match state.indexer.snapshot().await {
        Some(snapshot) => send(sender, &WsMessage::Snapshot(snapshot)).await,
        None => true,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the snapshot so no change falls between them
    let mut changes = state.indexer.subscribe();

    info!("WebSocket client connected");

    if !send_snapshot(&mut sender, &state).await {
        return;
    }

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(event) => {
                        if !send(&mut sender, &WsMessage::Change(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket client lagged, resending snapshot");
                        if !send_snapshot(&mut sender, &state).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Index change channel closed");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
