use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::validate_topic_name;

// ============================================================================
// Permissions
// ============================================================================

/// Global permission granted to a user.
///
/// `admin` implies full access everywhere; `read`/`write` gate subscribing
/// and publishing respectively and are further narrowed per topic by the
/// topic ACL.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Permission {
    Admin,
    Read,
    Write,
}

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub hashed_password: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub permissions: BTreeSet<Permission>,
    pub owned_topics: BTreeSet<String>,
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_permission(Permission::Admin)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserCreate {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    pub email: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub permissions: Option<BTreeSet<Permission>>,
}

/// User information safe to return to clients (no password hash).
#[derive(Debug, Serialize)]
pub struct UserPublic {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub permissions: BTreeSet<Permission>,
    pub owned_topics: BTreeSet<String>,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        UserPublic {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
            created_at: user.created_at,
            permissions: user.permissions,
            owned_topics: user.owned_topics,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// OAuth2-style token response. Clients call `/auth/me` for user details.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

// ============================================================================
// Topic Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: Uuid,
    pub topic_name: String,
    pub owner_id: Uuid,
    pub is_public: bool,
    pub allowed_user_ids: BTreeSet<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TopicCreate {
    #[validate(custom(function = "validate_topic_name"))]
    pub topic_name: String,
    #[serde(default)]
    pub is_public: bool,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TopicUpdate {
    pub is_public: Option<bool>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

/// Topic information returned to clients.
///
/// `allowed_user_ids` is only populated for the owner or an admin.
#[derive(Debug, Serialize)]
pub struct TopicPublic {
    pub topic_id: Uuid,
    pub topic_name: String,
    pub owner_id: Uuid,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_user_ids: Option<BTreeSet<Uuid>>,
}

impl TopicPublic {
    /// Render a topic for the given viewer, hiding the ACL from non-owners.
    pub fn for_viewer(topic: Topic, viewer: &User) -> Self {
        let can_see_acl = topic.owner_id == viewer.user_id || viewer.is_admin();
        TopicPublic {
            topic_id: topic.topic_id,
            topic_name: topic.topic_name,
            owner_id: topic.owner_id,
            is_public: topic.is_public,
            created_at: topic.created_at,
            description: topic.description,
            allowed_user_ids: can_see_acl.then_some(topic.allowed_user_ids),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopicPermissionGrant {
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopicPermission {
    pub topic_name: String,
    pub user_id: Uuid,
    pub username: String,
    pub granted_at: DateTime<Utc>,
}
