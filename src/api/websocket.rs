//! WebSocket handler for live updates

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let subscription = state.live.subscribe();
    let subscriber_id = subscription.id;
    let mut events = subscription.receiver;
    info!("WebSocket client {subscriber_id} connected");

    let (mut sender, mut receiver) = socket.split();

    // events are serialised once by the broadcaster and forwarded verbatim
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = events.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.live.unsubscribe(subscriber_id);
    info!("WebSocket client {subscriber_id} disconnected");
}
