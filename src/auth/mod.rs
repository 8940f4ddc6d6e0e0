//! Authentication and authorization: the bearer-token extractor, the
//! permission gate, and the race-safe auto-create-on-write primitive.

pub mod jwt;
pub mod models;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::{Claim, TopicStore, UserStore};
use models::{Permission, Topic, User};

// ============================================================================
// Auth extractor
// ============================================================================

/// Authenticated actor extracted from a valid bearer token.
///
/// The token is verified, the user is resolved through the per-process
/// cache, and `is_active` is revalidated on every request — including cache
/// hits.
pub struct AuthUser {
    user: User,
}

impl AuthUser {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn into_user(self) -> User {
        self.user
    }

    /// Succeeds iff the actor holds the permission.
    pub fn require_permission(&self, permission: Permission) -> AppResult<()> {
        if self.user.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Permission '{permission}' required"
            )))
        }
    }
}

/// Resolve a verified token subject to a live user, enforcing `is_active`.
pub async fn resolve_user(state: &AppState, user_id: Uuid) -> AppResult<User> {
    let user = state
        .load_user(user_id)
        .await?
        .ok_or_else(|| AppError::Auth("User not found".into()))?;
    if !user.is_active {
        return Err(AppError::Forbidden("User account is inactive".into()));
    }
    Ok(user)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Auth("Missing or invalid Authorization header".into()))?;

        let claims = state.signer.decode(bearer.token())?;
        let user = resolve_user(state, claims.user_id()?).await?;
        Ok(AuthUser { user })
    }
}

// ============================================================================
// Auto-create-on-write
// ============================================================================

/// Resolve a topic, creating it with `actor` as owner if it does not exist.
///
/// This is the only code path that creates topics implicitly. Concurrent
/// creation attempts are resolved by the store's atomic name claim: the
/// loser re-reads and returns the winner's topic.
pub async fn ensure_topic(state: &AppState, topic_name: &str, actor: &User) -> AppResult<Topic> {
    if let Some(topic) = state.topics.get_topic(topic_name).await? {
        return Ok(topic);
    }

    let candidate = Topic {
        topic_id: Uuid::new_v4(),
        topic_name: topic_name.to_string(),
        owner_id: actor.user_id,
        is_public: false,
        allowed_user_ids: Default::default(),
        description: Some(format!("Auto-created topic by {}", actor.username)),
        created_at: Utc::now(),
    };

    match state.topics.create_topic(candidate).await? {
        Claim::Created(topic) => {
            let mut updated = actor.clone();
            if updated.owned_topics.insert(topic_name.to_string()) {
                state.users.update_user(&updated).await?;
                state.user_cache.invalidate(&updated.user_id);
            }
            tracing::info!(topic = %topic_name, owner = %actor.username, "Auto-created topic");
            Ok(topic)
        }
        Claim::AlreadyExists => {
            // Lost the creation race; the winner's record must be visible
            // now.
            state
                .topics
                .get_topic(topic_name)
                .await?
                .ok_or(AppError::Internal)
        }
    }
}
