//! Storage abstractions: per-topic message logs, user records, and topic
//! records with their ACLs.
//!
//! Two backends implement each trait: an in-memory one for development and
//! tests, and a Redis-protocol one (streams + hashes + sets) for production.
//! The authoritative copy of every record lives in the backend; callers hold
//! only snapshots.

pub mod memory;
pub mod valkey;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::models::{Permission, Topic, User};
use crate::models::StoredMessage;

pub use memory::{MemoryLog, MemoryTopicStore, MemoryUserStore};
pub use valkey::{ValkeyLog, ValkeyTopicStore, ValkeyUserStore};

// ============================================================================
// Errors and outcomes
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport-level failure: connection refused, pool exhausted, timeout.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for StoreError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Outcome of an atomic name claim. Concurrent creations of the same name
/// resolve with exactly one `Created`; everyone else observes
/// `AlreadyExists` and no partial state.
#[derive(Debug)]
pub enum Claim<T> {
    Created(T),
    AlreadyExists,
}

impl<T> Claim<T> {
    pub fn created(self) -> Option<T> {
        match self {
            Claim::Created(value) => Some(value),
            Claim::AlreadyExists => None,
        }
    }
}

/// Outcome of a topic access grant.
#[derive(Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyGranted,
    TopicNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Debug, Serialize)]
pub struct UserStoreStats {
    pub total_users: usize,
    pub active_users: usize,
}

#[derive(Debug, Serialize)]
pub struct TopicStoreStats {
    pub total_topics: usize,
    pub public_topics: usize,
    pub private_topics: usize,
}

// ============================================================================
// Message log
// ============================================================================

/// Append-only ordered sequence of messages, keyed by topic.
///
/// `message_id`s are assigned at append time and strictly increase in the
/// log's ordering within a topic; they double as exclusive cursors for
/// `range`.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a message, returning its freshly assigned id. Enforces the
    /// configured per-topic cap by trimming the oldest entries.
    async fn append(
        &self,
        topic: &str,
        payload: &Map<String, Value>,
        timestamp: DateTime<Utc>,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<String, StoreError>;

    /// Read up to `limit` messages. Without a cursor, returns the oldest
    /// (`reverse = false`) or newest (`reverse = true`) entries. With a
    /// cursor, the cursor itself is excluded: forward reads return entries
    /// strictly after it, reverse reads entries strictly before it in
    /// reverse order.
    async fn range(
        &self,
        topic: &str,
        cursor: Option<&str>,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Number of currently retained messages for the topic.
    async fn len(&self, topic: &str) -> Result<usize, StoreError>;

    /// Trim to the most recent `keep` messages; returns how many were
    /// removed. A no-op when the topic holds `keep` or fewer.
    async fn trim(&self, topic: &str, keep: usize) -> Result<usize, StoreError>;

    /// Drop the whole log for a topic (used by topic deletion).
    async fn delete_topic(&self, topic: &str) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ============================================================================
// User store
// ============================================================================

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Atomically claim `user.username` and persist the record. On a claim
    /// conflict nothing is written.
    async fn create_user(&self, user: User) -> Result<Claim<User>, StoreError>;

    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Whole-record overwrite. Fails with `NotFound` if the user is gone.
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    /// Remove the user record and its username index entry. Returns whether
    /// a record was removed.
    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Statistics are an optional capability; backends without a cheap way
    /// to compute them return `None`.
    async fn stats(&self) -> Result<Option<UserStoreStats>, StoreError> {
        Ok(None)
    }
}

// ============================================================================
// Topic store
// ============================================================================

/// Evaluate the topic access decision chain for a loaded (or absent) topic.
///
/// An absent topic allows the check to pass: the write path auto-creates on
/// first write, and the read path verifies existence separately before
/// consulting this.
pub fn evaluate_access(
    topic: Option<&Topic>,
    user_id: Uuid,
    kind: AccessKind,
    user_permissions: &BTreeSet<Permission>,
) -> bool {
    if user_permissions.contains(&Permission::Admin) {
        return true;
    }
    let Some(topic) = topic else {
        return true;
    };
    if topic.owner_id == user_id {
        return true;
    }
    if topic.allowed_user_ids.contains(&user_id) {
        return true;
    }
    kind == AccessKind::Read && topic.is_public
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Atomically claim `topic.topic_name` and persist the record.
    async fn create_topic(&self, topic: Topic) -> Result<Claim<Topic>, StoreError>;

    async fn get_topic(&self, topic_name: &str) -> Result<Option<Topic>, StoreError>;

    /// Update mutable metadata; `None` fields are left untouched. Returns
    /// the updated topic, or `None` if it does not exist.
    async fn update_topic(
        &self,
        topic_name: &str,
        is_public: Option<bool>,
        description: Option<String>,
    ) -> Result<Option<Topic>, StoreError>;

    /// Delete the topic record and all its ACL entries. Returns whether a
    /// record was removed. The message log is cleaned up by the caller.
    async fn delete_topic(&self, topic_name: &str) -> Result<bool, StoreError>;

    async fn grant_access(&self, topic_name: &str, user_id: Uuid)
        -> Result<GrantOutcome, StoreError>;

    /// Returns `false` when the topic is missing or the user had no grant.
    async fn revoke_access(&self, topic_name: &str, user_id: Uuid) -> Result<bool, StoreError>;

    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError>;

    /// Topics the user owns or has been granted access to.
    async fn list_accessible(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError>;

    async fn can_access(
        &self,
        topic_name: &str,
        user_id: Uuid,
        kind: AccessKind,
        user_permissions: &BTreeSet<Permission>,
    ) -> Result<bool, StoreError> {
        let topic = self.get_topic(topic_name).await?;
        Ok(evaluate_access(topic.as_ref(), user_id, kind, user_permissions))
    }

    async fn stats(&self) -> Result<Option<TopicStoreStats>, StoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_owned_by(owner_id: Uuid, is_public: bool, allowed: &[Uuid]) -> Topic {
        Topic {
            topic_id: Uuid::new_v4(),
            topic_name: "t".into(),
            owner_id,
            is_public,
            allowed_user_ids: allowed.iter().copied().collect(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_can_access_anything() {
        let perms: BTreeSet<Permission> = [Permission::Admin].into();
        let topic = topic_owned_by(Uuid::new_v4(), false, &[]);
        assert!(evaluate_access(
            Some(&topic),
            Uuid::new_v4(),
            AccessKind::Write,
            &perms
        ));
    }

    #[test]
    fn absent_topic_allows_write_path_auto_create() {
        let perms: BTreeSet<Permission> = [Permission::Write].into();
        assert!(evaluate_access(None, Uuid::new_v4(), AccessKind::Write, &perms));
    }

    #[test]
    fn owner_and_grantee_can_access_private_topic() {
        let owner = Uuid::new_v4();
        let grantee = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let perms: BTreeSet<Permission> = [Permission::Read, Permission::Write].into();
        let topic = topic_owned_by(owner, false, &[grantee]);

        assert!(evaluate_access(Some(&topic), owner, AccessKind::Write, &perms));
        assert!(evaluate_access(Some(&topic), grantee, AccessKind::Write, &perms));
        assert!(!evaluate_access(
            Some(&topic),
            stranger,
            AccessKind::Write,
            &perms
        ));
    }

    #[test]
    fn public_topic_allows_read_but_not_write() {
        let perms: BTreeSet<Permission> = [Permission::Read, Permission::Write].into();
        let topic = topic_owned_by(Uuid::new_v4(), true, &[]);
        let stranger = Uuid::new_v4();

        assert!(evaluate_access(Some(&topic), stranger, AccessKind::Read, &perms));
        assert!(!evaluate_access(
            Some(&topic),
            stranger,
            AccessKind::Write,
            &perms
        ));
    }
}
