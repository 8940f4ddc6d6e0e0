//! Per-connection WebSocket session.
//!
//! Lifecycle: authenticate from the query-string token, require a
//! `subscribe` frame, then go live — deliver fan-out events and answer
//! `ping` / `ack` / `unsubscribe` frames until the peer goes away. The hub
//! registration is dropped on every exit path.

use std::borrow::Cow;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::models::{Permission, User};
use crate::models::{
    AckFrame, ErrorFrame, PongFrame, SubscribeFrame, SubscribedFrame, UnsubscribeFrame,
    UnsubscribedFrame,
};
use crate::state::AppState;

/// Close code for authentication / policy failures.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code for unexpected server errors.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// The JWT rides in a query parameter because WebSocket upgrade requests
/// are plain GETs and cannot reliably carry an Authorization header.
#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /ws?token=<access_token> — upgrade to a WebSocket session.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

/// Authenticate the connecting client. Policy failures close with 1008,
/// lookup failures with 1011.
async fn authenticate(state: &AppState, token: &str) -> Result<User, (u16, &'static str)> {
    let claims = state
        .signer
        .decode(token)
        .map_err(|_| (CLOSE_POLICY_VIOLATION, "Invalid or expired token"))?;
    let user_id = claims
        .user_id()
        .map_err(|_| (CLOSE_POLICY_VIOLATION, "Invalid or expired token"))?;

    let user = match state.load_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err((CLOSE_POLICY_VIOLATION, "User not found or inactive")),
        Err(e) => {
            tracing::error!("Error validating user for WebSocket: {e}");
            return Err((CLOSE_INTERNAL_ERROR, "Internal server error"));
        }
    };
    if !user.is_active {
        return Err((CLOSE_POLICY_VIOLATION, "User not found or inactive"));
    }
    if !user.has_permission(Permission::Read) {
        return Err((
            CLOSE_POLICY_VIOLATION,
            "Permission denied: read permission required",
        ));
    }
    Ok(user)
}

async fn handle_socket(mut socket: WebSocket, token: String, state: AppState) {
    let user = match authenticate(&state, &token).await {
        Ok(user) => user,
        Err((code, reason)) => {
            tracing::warn!(reason, "WebSocket connection rejected");
            close_with(socket, code, reason).await;
            return;
        }
    };

    let session_id = format!("sess_{}", &Uuid::new_v4().simple().to_string()[..12]);
    tracing::info!(session_id, username = %user.username, "WebSocket connection accepted");

    // First client frame must be a subscribe.
    let topics = match read_subscribe_frame(&mut socket).await {
        Ok(Some(topics)) => topics,
        Ok(None) => return, // peer went away before subscribing
        Err(message) => {
            let error = ErrorFrame::new("SUBSCRIPTION_ERROR", message);
            if let Ok(text) = serde_json::to_string(&error) {
                let _ = socket.send(Message::Text(text)).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.local_hub.connect(&session_id, tx.clone(), &topics).await;

    // Confirm the subscription before draining any fan-out events.
    let subscribed = SubscribedFrame {
        r#type: "subscribed",
        topics: topics.clone(),
        session_id: session_id.clone(),
        timestamp: Utc::now(),
    };
    match serde_json::to_string(&subscribed) {
        Ok(text) => {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                state.local_hub.disconnect(&session_id).await;
                return;
            }
        }
        Err(e) => {
            tracing::error!("Failed to serialize subscribed frame: {e}");
            state.local_hub.disconnect(&session_id).await;
            return;
        }
    }

    // Forward outbound events from the hub channel to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Handle inbound frames from the client.
    let recv_state = state.clone();
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&recv_state, &recv_session, &tx, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Ping/Pong frames are handled by the protocol layer.
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        session_id = recv_session,
                        "WebSocket receive error, closing: {e}"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Unsubscribe from everything on the way out.
    state.local_hub.disconnect(&session_id).await;
    tracing::info!(session_id, "WebSocket session closed");
}

/// Wait for the initial `subscribe` frame.
///
/// `Ok(None)` means the peer disconnected first; `Err` carries the reason
/// for a `SUBSCRIPTION_ERROR` reply.
async fn read_subscribe_frame(socket: &mut WebSocket) -> Result<Option<Vec<String>>, String> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text)
                    .map_err(|e| format!("Failed to subscribe: {e}"))?;
                if value.get("type").and_then(Value::as_str) != Some("subscribe") {
                    return Err("Failed to subscribe: expected a subscribe frame".into());
                }
                let frame: SubscribeFrame = serde_json::from_value(value)
                    .map_err(|e| format!("Failed to subscribe: {e}"))?;
                frame
                    .validate()
                    .map_err(|e| format!("Failed to subscribe: {e}"))?;
                return Ok(Some(frame.topics));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("WebSocket error before subscribe: {e}");
                return Ok(None);
            }
        }
    }
}

fn send_frame<T: serde::Serialize>(tx: &mpsc::UnboundedSender<String>, frame: &T) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(text);
    }
}

/// Process one text frame from a live session.
async fn handle_client_frame(
    state: &AppState,
    session_id: &str,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        send_frame(
            tx,
            &ErrorFrame::new("PROCESSING_ERROR", "Frame is not valid JSON"),
        );
        return;
    };

    match value.get("type").and_then(Value::as_str) {
        Some("ping") => {
            send_frame(
                tx,
                &PongFrame {
                    r#type: "pong",
                    timestamp: Utc::now(),
                },
            );
        }
        Some("ack") => {
            // Accepted and logged; no delivery tracking.
            if let Ok(ack) = serde_json::from_value::<AckFrame>(value) {
                tracing::debug!(session_id, message_id = %ack.message_id, "Client ack");
            }
        }
        Some("unsubscribe") => match serde_json::from_value::<UnsubscribeFrame>(value) {
            Ok(frame) => {
                state.local_hub.unsubscribe(session_id, &frame.topics).await;
                send_frame(
                    tx,
                    &UnsubscribedFrame {
                        r#type: "unsubscribed",
                        topics: frame.topics,
                        timestamp: Utc::now(),
                    },
                );
            }
            Err(e) => {
                send_frame(
                    tx,
                    &ErrorFrame::new("PROCESSING_ERROR", format!("Bad unsubscribe frame: {e}")),
                );
            }
        },
        other => {
            send_frame(
                tx,
                &ErrorFrame::new(
                    "UNKNOWN_MESSAGE_TYPE",
                    format!("Unknown message type: {}", other.unwrap_or("<missing>")),
                ),
            );
        }
    }
}
