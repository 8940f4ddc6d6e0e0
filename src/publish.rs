//! Publish pipeline: authorize, resolve the topic, append to the log, fan
//! out.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::Value;

use crate::auth::ensure_topic;
use crate::auth::models::{Permission, User};
use crate::error::{AppError, AppResult};
use crate::models::{
    message_event, BulkMessageResult, BulkPublishRequest, BulkPublishResponse, BulkSummary,
    MessageResponse, PublishRequest,
};
use crate::state::AppState;
use crate::store::{AccessKind, MessageLog, TopicStore};

/// Route a rendered event to subscribers.
///
/// With the relay running, the frame goes out on the shared channel only —
/// the originating worker receives it back and fans out then, so
/// broadcasting locally as well would double-deliver. Without a relay the
/// local hubs are invoked directly.
pub async fn dispatch_event(state: &AppState, topic: &str, event: &Value) {
    if let Some(coordinator) = state.coordinator.as_ref().filter(|c| c.is_running()) {
        match coordinator.publish(topic, event).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(topic, "Relay publish failed, falling back to local fan-out: {e}");
            }
        }
    }
    state.local_hub.broadcast(topic, event).await;
    state.poll_hub.broadcast(topic, event).await;
}

async fn authorize_topic_write(state: &AppState, actor: &User, topic: &str) -> AppResult<bool> {
    Ok(state
        .topics
        .can_access(topic, actor.user_id, AccessKind::Write, &actor.permissions)
        .await?)
}

/// Publish a single message. The publish is considered successful once the
/// log append commits; delivery failures are recovered downstream without
/// notifying the publisher.
pub async fn publish_message(
    state: &AppState,
    actor: &User,
    request: &PublishRequest,
) -> AppResult<MessageResponse> {
    if !actor.has_permission(Permission::Write) {
        return Err(AppError::Forbidden("Permission 'write' required".into()));
    }
    if !authorize_topic_write(state, actor, &request.topic).await? {
        return Err(AppError::Forbidden(format!(
            "Access denied to topic '{}'",
            request.topic
        )));
    }

    let topic = ensure_topic(state, &request.topic, actor).await?;
    let timestamp = Utc::now();
    let message_id = state
        .log
        .append(
            &topic.topic_name,
            &request.payload,
            timestamp,
            request.metadata.as_ref(),
        )
        .await?;

    let event = message_event(
        &message_id,
        &topic.topic_name,
        &request.payload,
        timestamp,
        request.metadata.as_ref(),
    );
    dispatch_event(state, &topic.topic_name, &event).await;

    Ok(MessageResponse {
        message_id,
        topic: topic.topic_name,
        timestamp,
    })
}

/// Publish a batch.
///
/// Authorization is checked upfront for every distinct topic; if any topic
/// denies access the whole batch fails with `Forbidden` and nothing is
/// appended. After that gate, per-message append failures are captured in
/// the result array without aborting the rest.
pub async fn publish_bulk(
    state: &AppState,
    actor: &User,
    request: &BulkPublishRequest,
) -> AppResult<BulkPublishResponse> {
    if !actor.has_permission(Permission::Write) {
        return Err(AppError::Forbidden("Permission 'write' required".into()));
    }

    let distinct_topics: BTreeSet<&str> = request
        .messages
        .iter()
        .map(|message| message.topic.as_str())
        .collect();

    let mut denied = Vec::new();
    for topic in &distinct_topics {
        if !authorize_topic_write(state, actor, topic).await? {
            denied.push(topic.to_string());
        }
    }
    if !denied.is_empty() {
        return Err(AppError::Forbidden(format!(
            "Access denied to topics: {}",
            denied.join(", ")
        )));
    }

    for topic in &distinct_topics {
        ensure_topic(state, topic, actor).await?;
    }

    let mut results = Vec::with_capacity(request.messages.len());
    let mut accepted = 0;
    let mut rejected = 0;

    for message in &request.messages {
        let timestamp = Utc::now();
        match state
            .log
            .append(
                &message.topic,
                &message.payload,
                timestamp,
                message.metadata.as_ref(),
            )
            .await
        {
            Ok(message_id) => {
                let event = message_event(
                    &message_id,
                    &message.topic,
                    &message.payload,
                    timestamp,
                    message.metadata.as_ref(),
                );
                dispatch_event(state, &message.topic, &event).await;

                results.push(BulkMessageResult {
                    message_id: Some(message_id),
                    topic: message.topic.clone(),
                    status: "accepted",
                    error: None,
                });
                accepted += 1;
            }
            Err(e) => {
                tracing::warn!(topic = %message.topic, "Bulk append failed: {e}");
                results.push(BulkMessageResult {
                    message_id: None,
                    topic: message.topic.clone(),
                    status: "rejected",
                    error: Some(e.to_string()),
                });
                rejected += 1;
            }
        }
    }

    Ok(BulkPublishResponse {
        results,
        summary: BulkSummary {
            total: request.messages.len(),
            accepted,
            rejected,
        },
    })
}
