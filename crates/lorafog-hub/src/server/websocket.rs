//! Observer WebSocket channel

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::info;

use crate::service::HubService;

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<HubService>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, service))
}

/// Push every broadcast line to one observer until either side goes away
async fn handle_socket(socket: WebSocket, service: Arc<HubService>) {
    let (observer_id, mut lines) = service.broadcaster().subscribe();
    info!(observer = %observer_id, "Observer connected");
    let (mut sender, mut receiver) = socket.split();
    let mut closing = service.closing();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = closing.stopped() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                next = lines.recv() => match next {
                    Some(line) => {
                        if sender.send(Message::Text(line)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Observers only listen; inbound frames are read to notice disconnects
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    service.broadcaster().unsubscribe(&observer_id);
    info!(observer = %observer_id, "Observer disconnected");
}
