//! Topic management: CRUD, message history, and per-topic permissions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::validation_error;
use crate::auth::models::{
    Permission, Topic, TopicCreate, TopicPermission, TopicPermissionGrant, TopicPublic,
    TopicUpdate, User,
};
use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::PaginatedMessagesResponse;
use crate::state::AppState;
use crate::store::{AccessKind, Claim, GrantOutcome, MessageLog, TopicStore, UserStore};

async fn fetch_topic(state: &AppState, topic_name: &str) -> AppResult<Topic> {
    state
        .topics
        .get_topic(topic_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Topic '{topic_name}' not found")))
}

/// Owner-or-admin gate shared by the mutating topic endpoints.
fn require_owner(topic: &Topic, user: &User, action: &str) -> AppResult<()> {
    if topic.owner_id == user.user_id || user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Only the topic owner can {action} it"
        )))
    }
}

async fn require_read_access(state: &AppState, topic_name: &str, user: &User) -> AppResult<()> {
    let can_access = state
        .topics
        .can_access(topic_name, user.user_id, AccessKind::Read, &user.permissions)
        .await?;
    if can_access {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Access denied to topic '{topic_name}'"
        )))
    }
}

// ============================================================================
// CRUD
// ============================================================================

/// POST /api/v1/topics — create a topic; the caller becomes its owner.
pub async fn create_topic(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<TopicCreate>,
) -> AppResult<(StatusCode, Json<TopicPublic>)> {
    auth.require_permission(Permission::Write)?;
    request.validate().map_err(validation_error)?;

    let actor = auth.user();
    let topic = Topic {
        topic_id: Uuid::new_v4(),
        topic_name: request.topic_name.clone(),
        owner_id: actor.user_id,
        is_public: request.is_public,
        allowed_user_ids: Default::default(),
        description: request.description,
        created_at: Utc::now(),
    };

    match state.topics.create_topic(topic).await? {
        Claim::Created(topic) => {
            let mut owner = actor.clone();
            if owner.owned_topics.insert(topic.topic_name.clone()) {
                state.users.update_user(&owner).await?;
                state.user_cache.invalidate(&owner.user_id);
            }
            Ok((
                StatusCode::CREATED,
                Json(TopicPublic::for_viewer(topic, actor)),
            ))
        }
        Claim::AlreadyExists => Err(AppError::Conflict(format!(
            "Topic '{}' already exists",
            request.topic_name
        ))),
    }
}

/// GET /api/v1/topics — topics visible to the caller.
pub async fn list_topics(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<TopicPublic>>> {
    let user = auth.user();
    let topics = if user.is_admin() {
        state.topics.list_owned(user.user_id).await?
    } else {
        state.topics.list_accessible(user.user_id).await?
    };

    Ok(Json(
        topics
            .into_iter()
            .map(|topic| TopicPublic::for_viewer(topic, user))
            .collect(),
    ))
}

/// GET /api/v1/topics/:topic_name
pub async fn get_topic(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
) -> AppResult<Json<TopicPublic>> {
    let topic = fetch_topic(&state, &topic_name).await?;
    require_read_access(&state, &topic_name, auth.user()).await?;
    Ok(Json(TopicPublic::for_viewer(topic, auth.user())))
}

/// PUT /api/v1/topics/:topic_name — update metadata (owner/admin).
pub async fn update_topic(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
    Json(request): Json<TopicUpdate>,
) -> AppResult<Json<TopicPublic>> {
    request.validate().map_err(validation_error)?;
    let topic = fetch_topic(&state, &topic_name).await?;
    require_owner(&topic, auth.user(), "update")?;

    let updated = state
        .topics
        .update_topic(&topic_name, request.is_public, request.description)
        .await?
        .ok_or(AppError::Internal)?;

    tracing::info!(topic = %topic_name, user = %auth.user().username, "Topic updated");
    Ok(Json(TopicPublic::for_viewer(updated, auth.user())))
}

/// DELETE /api/v1/topics/:topic_name — delete a topic and its messages
/// (owner/admin).
pub async fn delete_topic(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
) -> AppResult<StatusCode> {
    let topic = fetch_topic(&state, &topic_name).await?;
    require_owner(&topic, auth.user(), "delete")?;

    if !state.topics.delete_topic(&topic_name).await? {
        return Err(AppError::Internal);
    }
    // Cascade: the per-topic log goes with the topic record.
    state.log.delete_topic(&topic_name).await?;

    // Keep the owner's owned_topics in sync.
    if let Some(mut owner) = state.users.get_by_id(topic.owner_id).await? {
        if owner.owned_topics.remove(&topic_name) {
            state.users.update_user(&owner).await?;
            state.user_cache.invalidate(&owner.user_id);
        }
    }

    tracing::info!(topic = %topic_name, user = %auth.user().username, "Topic deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Message history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub order: Option<String>,
    /// Exclusive cursor. `order=asc` pages forward in time, `order=desc`
    /// pages backward.
    pub cursor: Option<String>,
}

/// GET /api/v1/topics/:topic_name/messages — cursor-paginated history.
pub async fn get_topic_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<PaginatedMessagesResponse>> {
    fetch_topic(&state, &topic_name).await?;
    require_read_access(&state, &topic_name, auth.user()).await?;

    let order = query.order.unwrap_or_else(|| "desc".to_string());
    if order != "asc" && order != "desc" {
        return Err(AppError::Validation("Order must be 'asc' or 'desc'".into()));
    }

    let limit = query.limit.unwrap_or(10);
    if limit < 1 {
        return Err(AppError::Validation("Limit must be at least 1".into()));
    }
    let limit = limit.min(100);

    let reverse = order == "desc";
    let messages = state
        .log
        .range(&topic_name, query.cursor.as_deref(), limit, reverse)
        .await?;

    let next_cursor = messages.last().map(|message| message.message_id.clone());

    Ok(Json(PaginatedMessagesResponse {
        total: messages.len(),
        messages,
        limit,
        order,
        cursor: query.cursor,
        next_cursor,
    }))
}

// ============================================================================
// Permissions
// ============================================================================

/// POST /api/v1/topics/:topic_name/permissions — grant access
/// (owner/admin).
pub async fn grant_access(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
    Json(request): Json<TopicPermissionGrant>,
) -> AppResult<(StatusCode, Json<TopicPermission>)> {
    let topic = fetch_topic(&state, &topic_name).await?;
    require_owner(&topic, auth.user(), "grant access to")?;

    let target = match (request.user_id, request.username.as_deref()) {
        (Some(user_id), _) => state.users.get_by_id(user_id).await?,
        (None, Some(username)) => state.users.get_by_username(username).await?,
        (None, None) => {
            return Err(AppError::Validation(
                "Either user_id or username must be provided".into(),
            ));
        }
    };
    let target = target.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    match state.topics.grant_access(&topic_name, target.user_id).await? {
        GrantOutcome::Granted => {
            tracing::info!(
                topic = %topic_name,
                username = %target.username,
                "Granted topic access"
            );
            Ok((
                StatusCode::CREATED,
                Json(TopicPermission {
                    topic_name,
                    user_id: target.user_id,
                    username: target.username,
                    granted_at: Utc::now(),
                }),
            ))
        }
        GrantOutcome::AlreadyGranted => Err(AppError::Conflict(format!(
            "User {} already has access to topic {topic_name}",
            target.user_id
        ))),
        GrantOutcome::TopicNotFound => {
            Err(AppError::NotFound(format!("Topic '{topic_name}' not found")))
        }
    }
}

/// DELETE /api/v1/topics/:topic_name/permissions/:user_id — revoke access
/// (owner/admin).
pub async fn revoke_access(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((topic_name, user_id)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    let topic = fetch_topic(&state, &topic_name).await?;
    require_owner(&topic, auth.user(), "revoke access to")?;

    if !state.topics.revoke_access(&topic_name, user_id).await? {
        return Err(AppError::NotFound(
            "User does not have access to this topic".into(),
        ));
    }

    tracing::info!(topic = %topic_name, %user_id, "Revoked topic access");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/topics/:topic_name/permissions — list grants (owner/admin).
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(topic_name): Path<String>,
) -> AppResult<Json<Vec<TopicPermission>>> {
    let topic = fetch_topic(&state, &topic_name).await?;
    require_owner(&topic, auth.user(), "list permissions for")?;

    let mut permissions = Vec::with_capacity(topic.allowed_user_ids.len());
    for user_id in &topic.allowed_user_ids {
        if let Some(user) = state.users.get_by_id(*user_id).await? {
            permissions.push(TopicPermission {
                topic_name: topic_name.clone(),
                user_id: *user_id,
                username: user.username,
                // Grant time is not tracked per entry.
                granted_at: Utc::now(),
            });
        }
    }
    Ok(Json(permissions))
}

/// GET /api/v1/topics/stats — topic store statistics (admin only).
pub async fn topic_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    auth.require_permission(Permission::Admin)?;

    match state.topics.stats().await? {
        Some(stats) => Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null))),
        None => Ok(Json(json!({
            "error": "Statistics not available for this storage backend"
        }))),
    }
}
