//! HTTP long polling, the WebSocket fallback.

use std::time::Duration;

use axum::{extract::State, Json};
use serde_json::Value;
use validator::Validate;

use super::validation_error;
use crate::auth::models::Permission;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::hub::{PollHub, PollStats};
use crate::models::{PollRequest, PollResponse};
use crate::state::AppState;
use crate::store::MessageLog;

/// Removes the waiter when the request ends, whatever the exit path — a
/// client that drops the connection mid-wait must not leave its waiter
/// registered.
struct WaiterGuard {
    hub: PollHub,
    waiter_id: String,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let waiter_id = std::mem::take(&mut self.waiter_id);
        tokio::spawn(async move {
            hub.remove_waiter(&waiter_id).await;
        });
    }
}

/// POST /messages/poll — block up to `timeout` seconds for new messages.
///
/// With a `since` map the request first catches up from the log; if that
/// yields anything it returns immediately and no waiter is registered.
pub async fn long_poll(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<PollRequest>,
) -> AppResult<Json<PollResponse>> {
    auth.require_permission(Permission::Read)?;
    request.validate().map_err(validation_error)?;
    let timeout = request.timeout.clamp(1, 60);

    // Catch-up: replay what the client missed since its cursors.
    let mut messages: Vec<Value> = Vec::new();
    if let Some(since) = &request.since {
        for topic in &request.topics {
            let cursor = since.get(topic).map(String::as_str);
            match state.log.range(topic, cursor, 100, false).await {
                Ok(batch) => {
                    for message in batch {
                        messages.push(serde_json::to_value(message).unwrap_or(Value::Null));
                    }
                }
                Err(e) => {
                    tracing::error!(topic, "Error fetching catch-up messages: {e}");
                }
            }
        }
    }

    if !messages.is_empty() {
        let has_more = messages.len() >= 100;
        return Ok(Json(PollResponse { messages, has_more }));
    }

    // Nothing to catch up on: wait for a live event.
    let waiter = state.poll_hub.create_waiter(&request.topics).await;
    let _guard = WaiterGuard {
        hub: state.poll_hub.clone(),
        waiter_id: waiter.waiter_id().to_string(),
    };

    let messages = waiter
        .wait_for_messages(Duration::from_secs(timeout))
        .await;

    Ok(Json(PollResponse {
        messages,
        has_more: false,
    }))
}

/// GET /messages/poll/stats — active waiter counts.
pub async fn poll_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<PollStats>> {
    auth.require_permission(Permission::Read)?;
    Ok(Json(state.poll_hub.stats().await))
}
