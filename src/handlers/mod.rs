pub mod auth;
pub mod messages;
pub mod polling;
pub mod topics;

use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;

use crate::error::AppError;
use crate::models::{HealthResponse, ReadinessResponse};
use crate::state::AppState;
use crate::store::MessageLog;
use crate::websocket;

/// Flatten validator errors into a single 400 message.
pub(crate) fn validation_error(errors: validator::ValidationErrors) -> AppError {
    AppError::Validation(errors.to_string().replace('\n', "; "))
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn readiness_check(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let mut checks = BTreeMap::new();
    match state.log.health_check().await {
        Ok(()) => {
            checks.insert("storage".to_string(), "ok".to_string());
        }
        Err(e) => {
            checks.insert("storage".to_string(), format!("error: {e}"));
        }
    }

    let ready = checks.values().all(|status| status == "ok");
    Json(ReadinessResponse { ready, checks })
}

/// Build the full application router over the given state.
///
/// Shared between the binary and the integration tests so the routed
/// surface cannot drift between the two.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Authentication and user administration
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/register", post(auth::register))
        .route("/auth/users", get(auth::list_users))
        .route("/auth/users/stats", get(auth::user_stats))
        .route(
            "/auth/users/:user_id",
            axum::routing::patch(auth::update_user).delete(auth::delete_user),
        )
        // Topics
        .route(
            "/api/v1/topics",
            post(topics::create_topic).get(topics::list_topics),
        )
        .route("/api/v1/topics/stats", get(topics::topic_stats))
        .route(
            "/api/v1/topics/:topic_name",
            get(topics::get_topic)
                .put(topics::update_topic)
                .delete(topics::delete_topic),
        )
        .route(
            "/api/v1/topics/:topic_name/messages",
            get(topics::get_topic_messages),
        )
        .route(
            "/api/v1/topics/:topic_name/permissions",
            post(topics::grant_access).get(topics::list_permissions),
        )
        .route(
            "/api/v1/topics/:topic_name/permissions/:user_id",
            delete(topics::revoke_access),
        )
        // Message ingestion
        .route("/api/v1/messages", post(messages::create_message))
        .route("/api/v1/messages/bulk", post(messages::create_bulk_messages))
        // Long polling
        .route("/messages/poll", post(polling::long_poll))
        .route("/messages/poll/stats", get(polling::poll_stats))
        // WebSocket delivery
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
}
