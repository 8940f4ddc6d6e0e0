//! Message ingestion endpoints. The interesting work happens in the
//! publish pipeline; these handlers validate and map to HTTP.

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use super::validation_error;
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::models::{BulkPublishRequest, BulkPublishResponse, MessageResponse, PublishRequest};
use crate::publish;
use crate::state::AppState;

/// POST /api/v1/messages — publish a message to a topic.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<PublishRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    request.validate().map_err(validation_error)?;
    let response = publish::publish_message(&state, auth.user(), &request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/messages/bulk — publish a batch; per-message results with
/// a multi-status response.
pub async fn create_bulk_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<BulkPublishRequest>,
) -> AppResult<(StatusCode, Json<BulkPublishResponse>)> {
    request.validate().map_err(validation_error)?;
    let response = publish::publish_bulk(&state, auth.user(), &request).await?;
    Ok((StatusCode::MULTI_STATUS, Json(response)))
}
