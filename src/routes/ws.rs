//! WebSocket endpoint for live operation push
//!
//! Devices connect with the same bearer token used for HTTP, passed as
//! query parameters along with their device id, validated before the
//! upgrade completes. The socket is server-push only: after a greeting
//! frame, the server forwards operation events accepted from the
//! user's other devices. Inbound frames are ignored except Close.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the websocket router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(connect))
}

/// Connection query parameters
#[derive(Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

/// Validate the presented credentials, then upgrade
async fn connect(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))?;
    let device_id = params
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Device ID is required".to_string()))?;

    let user = state
        .verifier()
        .verify(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.user_id, device_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64, device_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Queued before the hub can see this connection, so a push racing
    // the registration can never land ahead of the greeting.
    let greeting = json!({
        "type": "connected",
        "data": { "deviceId": device_id },
    });
    let _ = tx.send(greeting.to_string());

    let connection_id = state.hub().register(user_id, &device_id, tx).await;

    // Queued pushes flow to the socket until either side goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub().deregister(user_id, connection_id).await;
}
