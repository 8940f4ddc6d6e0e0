//! Authentication endpoints and admin-only user management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form, Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use super::validation_error;
use crate::auth::jwt::{hash_password, verify_password};
use crate::auth::models::{
    LoginRequest, Permission, TokenResponse, User, UserCreate, UserPublic, UserUpdate,
};
use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::{Claim, UserStore};

/// POST /auth/login — authenticate and return a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Form(request): Form<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let user = state
        .users
        .get_by_username(&request.username)
        .await?
        .ok_or_else(|| {
            tracing::warn!(username = %request.username, "Login attempt for unknown user");
            AppError::Auth("Incorrect username or password".into())
        })?;

    if !verify_password(request.password, user.hashed_password.clone()).await? {
        tracing::warn!(username = %user.username, "Invalid password");
        return Err(AppError::Auth("Incorrect username or password".into()));
    }

    if !user.is_active {
        return Err(AppError::Forbidden("User account is inactive".into()));
    }

    let access_token = state.signer.mint(&user)?;
    tracing::info!(username = %user.username, "User logged in");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
        expires_in: state.signer.expires_in_seconds(),
    }))
}

/// GET /auth/me — current user information.
pub async fn me(auth: AuthUser) -> Json<UserPublic> {
    Json(auth.into_user().into())
}

/// POST /auth/register — create a user (admin only).
pub async fn register(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<UserCreate>,
) -> AppResult<(StatusCode, Json<UserPublic>)> {
    auth.require_permission(Permission::Admin)?;
    request.validate().map_err(validation_error)?;

    let hashed_password = hash_password(request.password).await?;
    let user = User {
        user_id: Uuid::new_v4(),
        username: request.username,
        email: request.email,
        hashed_password,
        is_active: true,
        created_at: Utc::now(),
        permissions: request.permissions,
        owned_topics: Default::default(),
    };

    match state.users.create_user(user).await? {
        Claim::Created(user) => {
            tracing::info!(
                username = %user.username,
                admin = %auth.user().username,
                "User registered"
            );
            Ok((StatusCode::CREATED, Json(user.into())))
        }
        Claim::AlreadyExists => Err(AppError::Conflict("Username already exists".into())),
    }
}

/// GET /auth/users — list all users (admin only).
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<UserPublic>>> {
    auth.require_permission(Permission::Admin)?;
    let users = state.users.list_users().await?;
    Ok(Json(users.into_iter().map(UserPublic::from).collect()))
}

/// PATCH /auth/users/:user_id — partial update (admin only).
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UserUpdate>,
) -> AppResult<Json<UserPublic>> {
    auth.require_permission(Permission::Admin)?;

    let mut user = state
        .users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{user_id}' not found")))?;

    if let Some(email) = request.email {
        user.email = Some(email);
    }
    if let Some(password) = request.password {
        if password.len() < 8 {
            return Err(AppError::Validation(
                "Password must be at least 8 characters".into(),
            ));
        }
        user.hashed_password = hash_password(password).await?;
    }
    if let Some(is_active) = request.is_active {
        user.is_active = is_active;
    }
    if let Some(permissions) = request.permissions {
        user.permissions = permissions;
    }

    state.users.update_user(&user).await?;
    state.user_cache.invalidate(&user_id);
    tracing::info!(username = %user.username, admin = %auth.user().username, "User updated");

    Ok(Json(user.into()))
}

/// DELETE /auth/users/:user_id — remove a user (admin only, never self).
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require_permission(Permission::Admin)?;

    if user_id == auth.user().user_id {
        return Err(AppError::Validation(
            "Cannot delete your own account".into(),
        ));
    }

    if !state.users.delete_user(user_id).await? {
        return Err(AppError::NotFound(format!("User '{user_id}' not found")));
    }
    state.user_cache.invalidate(&user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/users/stats — user store statistics (admin only).
pub async fn user_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Value>> {
    auth.require_permission(Permission::Admin)?;

    match state.users.stats().await? {
        Some(stats) => Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null))),
        None => Ok(Json(json!({
            "error": "Statistics not available for this storage backend"
        }))),
    }
}
