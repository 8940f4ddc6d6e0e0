//! Redis-protocol backends: message streams, user hashes, topic hashes/sets.
//!
//! Commands go through a shared `deadpool-redis` pool. Atomic name claims
//! use conditional hash-field writes (`HSETNX`): usernames claim a field in
//! the `user:username_index` hash, topics claim the `topic_id` sentinel
//! field of their own hash.
//!
//! ## Key layout
//!
//! - `stream:topic:{name}` — append-only message stream
//! - `user:{user_id}` — user record hash (`permissions` / `owned_topics`
//!   stored as JSON arrays)
//! - `user:username_index` — hash `username → user_id`
//! - `topic:{name}` — topic record hash; `topic:{name}:allowed_users` — set
//! - `user:{user_id}:owned_topics`, `user:{user_id}:topics` — name sets

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Claim, GrantOutcome, MessageLog, StoreError, TopicStore, UserStore};
use crate::auth::models::{Permission, Topic, User};
use crate::models::StoredMessage;

const USERNAME_INDEX_KEY: &str = "user:username_index";

fn stream_key(topic: &str) -> String {
    format!("stream:topic:{topic}")
}

fn user_key(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

fn topic_key(topic_name: &str) -> String {
    format!("topic:{topic_name}")
}

fn allowed_users_key(topic_name: &str) -> String {
    format!("topic:{topic_name}:allowed_users")
}

fn owned_topics_key(user_id: Uuid) -> String {
    format!("user:{user_id}:owned_topics")
}

fn accessible_topics_key(user_id: Uuid) -> String {
    format!("user:{user_id}:topics")
}

/// Build the store connection URL from the configured parts.
pub fn store_url(host: &str, port: u16, password: &str, tls: bool) -> String {
    let scheme = if tls { "rediss" } else { "redis" };
    if password.is_empty() {
        format!("{scheme}://{host}:{port}")
    } else {
        format!("{scheme}://:{password}@{host}:{port}")
    }
}

/// Sanitize a store URL for logging (masks the password).
pub fn sanitize_store_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = url[scheme_end..at_pos].find(':') {
            let abs_colon = scheme_end + colon_pos;
            return format!("{}***{}", &url[..abs_colon + 1], &url[at_pos..]);
        }
    }
    url.to_string()
}

/// Create a command pool with bounded acquire/create deadlines.
pub fn create_pool(url: &str) -> Result<Pool, StoreError> {
    let mut config = Config::from_url(url);
    config.pool = Some(PoolConfig {
        max_size: 32,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(5)),
            recycle: Some(Duration::from_secs(5)),
        },
        ..Default::default()
    });

    config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::Unavailable(format!("failed to create store pool: {e}")))
}

/// Verify connectivity with a PING.
pub async fn ping(pool: &Pool) -> Result<(), StoreError> {
    let mut conn = pool.get().await?;
    deadpool_redis::redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await?;
    Ok(())
}

// ============================================================================
// Message log
// ============================================================================

/// Stream-backed log. `message_id` is the store-assigned stream id
/// (`<ms>-<seq>`), which is lexicographically ordered and doubles as the
/// range cursor.
pub struct ValkeyLog {
    pool: Pool,
    max_messages_per_topic: usize,
    /// Stream TTL in seconds, refreshed on every append.
    retention_seconds: u64,
}

impl ValkeyLog {
    pub fn new(pool: Pool, max_messages_per_topic: usize, retention_seconds: u64) -> Self {
        ValkeyLog {
            pool,
            max_messages_per_topic,
            retention_seconds,
        }
    }

    fn entry_to_message(
        topic: &str,
        entry_id: String,
        fields: HashMap<String, String>,
    ) -> Option<StoredMessage> {
        let payload = match fields.get("payload") {
            Some(raw) => serde_json::from_str(raw).ok()?,
            None => return None,
        };
        let timestamp = fields
            .get("timestamp")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))?;
        let metadata = fields
            .get("metadata")
            .and_then(|raw| serde_json::from_str(raw).ok());

        Some(StoredMessage {
            message_id: entry_id,
            topic: topic.to_string(),
            payload,
            timestamp,
            metadata,
        })
    }
}

#[async_trait]
impl MessageLog for ValkeyLog {
    async fn append(
        &self,
        topic: &str,
        payload: &Map<String, Value>,
        timestamp: DateTime<Utc>,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<String, StoreError> {
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        let payload_json = serde_json::to_string(payload)
            .map_err(|e| StoreError::Unavailable(format!("payload encode failed: {e}")))?;

        // XADD with exact MAXLEN keeps the hard cap enforced on every
        // append.
        let mut cmd = deadpool_redis::redis::cmd("XADD");
        cmd.arg(&key)
            .arg("MAXLEN")
            .arg("=")
            .arg(self.max_messages_per_topic)
            .arg("*")
            .arg("payload")
            .arg(&payload_json)
            .arg("timestamp")
            .arg(timestamp.to_rfc3339());
        if let Some(meta) = metadata {
            let meta_json = serde_json::to_string(meta)
                .map_err(|e| StoreError::Unavailable(format!("metadata encode failed: {e}")))?;
            cmd.arg("metadata").arg(&meta_json);
        }

        let stream_id: String = cmd.query_async(&mut conn).await?;

        let _: i64 = deadpool_redis::redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.retention_seconds)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(topic, message_id = %stream_id, "Appended message to stream");
        Ok(stream_id)
    }

    async fn range(
        &self,
        topic: &str,
        cursor: Option<&str>,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let limit = limit.min(100);
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        // `(` makes the bound exclusive, matching the cursor contract.
        let entries: Vec<(String, HashMap<String, String>)> = if reverse {
            let end = cursor.map_or_else(|| "+".to_string(), |c| format!("({c}"));
            deadpool_redis::redis::cmd("XREVRANGE")
                .arg(&key)
                .arg(&end)
                .arg("-")
                .arg("COUNT")
                .arg(limit)
                .query_async(&mut conn)
                .await?
        } else {
            let start = cursor.map_or_else(|| "-".to_string(), |c| format!("({c}"));
            deadpool_redis::redis::cmd("XRANGE")
                .arg(&key)
                .arg(&start)
                .arg("+")
                .arg("COUNT")
                .arg(limit)
                .query_async(&mut conn)
                .await?
        };

        let mut messages = Vec::with_capacity(entries.len());
        for (entry_id, fields) in entries {
            match Self::entry_to_message(topic, entry_id, fields) {
                Some(message) => messages.push(message),
                None => tracing::warn!(topic, "Skipping malformed stream entry"),
            }
        }
        Ok(messages)
    }

    async fn len(&self, topic: &str) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;
        let length: usize = deadpool_redis::redis::cmd("XLEN")
            .arg(stream_key(topic))
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }

    async fn trim(&self, topic: &str, keep: usize) -> Result<usize, StoreError> {
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        let current: usize = deadpool_redis::redis::cmd("XLEN")
            .arg(&key)
            .query_async(&mut conn)
            .await?;
        if current <= keep {
            return Ok(0);
        }

        let _: i64 = deadpool_redis::redis::cmd("XTRIM")
            .arg(&key)
            .arg("MAXLEN")
            .arg("=")
            .arg(keep)
            .query_async(&mut conn)
            .await?;

        Ok(current - keep)
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = deadpool_redis::redis::cmd("DEL")
            .arg(stream_key(topic))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        ping(&self.pool).await
    }
}

// ============================================================================
// User store
// ============================================================================

pub struct ValkeyUserStore {
    pool: Pool,
}

impl ValkeyUserStore {
    pub fn new(pool: Pool) -> Self {
        ValkeyUserStore { pool }
    }

    fn user_to_fields(user: &User) -> Result<Vec<(&'static str, String)>, StoreError> {
        let permissions = serde_json::to_string(&user.permissions)
            .map_err(|e| StoreError::Unavailable(format!("permissions encode failed: {e}")))?;
        let owned_topics = serde_json::to_string(&user.owned_topics)
            .map_err(|e| StoreError::Unavailable(format!("owned_topics encode failed: {e}")))?;
        Ok(vec![
            ("user_id", user.user_id.to_string()),
            ("username", user.username.clone()),
            ("email", user.email.clone().unwrap_or_default()),
            ("hashed_password", user.hashed_password.clone()),
            ("is_active", user.is_active.to_string()),
            ("created_at", user.created_at.to_rfc3339()),
            ("permissions", permissions),
            ("owned_topics", owned_topics),
        ])
    }

    fn user_from_hash(fields: HashMap<String, String>) -> Option<User> {
        let user_id = Uuid::parse_str(fields.get("user_id")?).ok()?;
        let created_at = DateTime::parse_from_rfc3339(fields.get("created_at")?)
            .ok()?
            .with_timezone(&Utc);
        let permissions: BTreeSet<Permission> = fields
            .get("permissions")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let owned_topics: BTreeSet<String> = fields
            .get("owned_topics")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let email = fields
            .get("email")
            .filter(|e| !e.is_empty())
            .cloned();

        Some(User {
            user_id,
            username: fields.get("username")?.clone(),
            email,
            hashed_password: fields.get("hashed_password")?.clone(),
            is_active: fields.get("is_active").map(String::as_str) == Some("true"),
            created_at,
            permissions,
            owned_topics,
        })
    }

    async fn write_user_fields(&self, user: &User) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let mut cmd = deadpool_redis::redis::cmd("HSET");
        cmd.arg(user_key(user.user_id));
        for (field, value) in Self::user_to_fields(user)? {
            cmd.arg(field).arg(value);
        }
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for ValkeyUserStore {
    async fn create_user(&self, user: User) -> Result<Claim<User>, StoreError> {
        let mut conn = self.pool.get().await?;

        // Atomic username claim on the index hash.
        let claimed: i64 = deadpool_redis::redis::cmd("HSETNX")
            .arg(USERNAME_INDEX_KEY)
            .arg(&user.username)
            .arg(user.user_id.to_string())
            .query_async(&mut conn)
            .await?;
        if claimed == 0 {
            return Ok(Claim::AlreadyExists);
        }
        drop(conn);

        // Claim won; write the record. If that fails the claim must be
        // released so the name stays available.
        if let Err(e) = self.write_user_fields(&user).await {
            if let Ok(mut conn) = self.pool.get().await {
                let _: Result<i64, _> = deadpool_redis::redis::cmd("HDEL")
                    .arg(USERNAME_INDEX_KEY)
                    .arg(&user.username)
                    .query_async(&mut conn)
                    .await;
            }
            return Err(e);
        }

        tracing::info!(username = %user.username, user_id = %user.user_id, "Created user");
        Ok(Claim::Created(user))
    }

    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = deadpool_redis::redis::cmd("HGETALL")
            .arg(user_key(user_id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Self::user_from_hash(fields))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user_id: Option<String> = deadpool_redis::redis::cmd("HGET")
            .arg(USERNAME_INDEX_KEY)
            .arg(username)
            .query_async(&mut conn)
            .await?;
        drop(conn);

        match user_id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let exists: i64 = deadpool_redis::redis::cmd("EXISTS")
            .arg(user_key(user.user_id))
            .query_async(&mut conn)
            .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.user_id)));
        }
        drop(conn);
        self.write_user_fields(user).await
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let Some(user) = self.get_by_id(user_id).await? else {
            return Ok(false);
        };

        let mut conn = self.pool.get().await?;
        let _: i64 = deadpool_redis::redis::cmd("DEL")
            .arg(user_key(user_id))
            .arg(owned_topics_key(user_id))
            .arg(accessible_topics_key(user_id))
            .query_async(&mut conn)
            .await?;
        let _: i64 = deadpool_redis::redis::cmd("HDEL")
            .arg(USERNAME_INDEX_KEY)
            .arg(&user.username)
            .query_async(&mut conn)
            .await?;

        tracing::info!(username = %user.username, %user_id, "Deleted user");
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let index: HashMap<String, String> = deadpool_redis::redis::cmd("HGETALL")
            .arg(USERNAME_INDEX_KEY)
            .query_async(&mut conn)
            .await?;
        drop(conn);

        let mut users = Vec::with_capacity(index.len());
        for user_id in index.values() {
            if let Ok(id) = Uuid::parse_str(user_id) {
                if let Some(user) = self.get_by_id(id).await? {
                    users.push(user);
                }
            }
        }
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }
}

// ============================================================================
// Topic store
// ============================================================================

pub struct ValkeyTopicStore {
    pool: Pool,
}

impl ValkeyTopicStore {
    pub fn new(pool: Pool) -> Self {
        ValkeyTopicStore { pool }
    }

    fn topic_from_hash(
        fields: HashMap<String, String>,
        allowed_user_ids: BTreeSet<Uuid>,
    ) -> Option<Topic> {
        let topic_id = Uuid::parse_str(fields.get("topic_id")?).ok()?;
        let owner_id = Uuid::parse_str(fields.get("owner_id")?).ok()?;
        let created_at = DateTime::parse_from_rfc3339(fields.get("created_at")?)
            .ok()?
            .with_timezone(&Utc);
        let description = fields
            .get("description")
            .filter(|d| !d.is_empty())
            .cloned();

        Some(Topic {
            topic_id,
            topic_name: fields.get("topic_name")?.clone(),
            owner_id,
            is_public: fields.get("is_public").map(String::as_str) == Some("true"),
            allowed_user_ids,
            description,
            created_at,
        })
    }
}

#[async_trait]
impl TopicStore for ValkeyTopicStore {
    async fn create_topic(&self, topic: Topic) -> Result<Claim<Topic>, StoreError> {
        let key = topic_key(&topic.topic_name);
        let mut conn = self.pool.get().await?;

        // Atomic claim via the topic_id sentinel field.
        let claimed: i64 = deadpool_redis::redis::cmd("HSETNX")
            .arg(&key)
            .arg("topic_id")
            .arg(topic.topic_id.to_string())
            .query_async(&mut conn)
            .await?;
        if claimed == 0 {
            return Ok(Claim::AlreadyExists);
        }

        let _: i64 = deadpool_redis::redis::cmd("HSET")
            .arg(&key)
            .arg("topic_name")
            .arg(&topic.topic_name)
            .arg("owner_id")
            .arg(topic.owner_id.to_string())
            .arg("is_public")
            .arg(topic.is_public.to_string())
            .arg("description")
            .arg(topic.description.clone().unwrap_or_default())
            .arg("created_at")
            .arg(topic.created_at.to_rfc3339())
            .query_async(&mut conn)
            .await?;

        let _: i64 = deadpool_redis::redis::cmd("SADD")
            .arg(owned_topics_key(topic.owner_id))
            .arg(&topic.topic_name)
            .query_async(&mut conn)
            .await?;
        let _: i64 = deadpool_redis::redis::cmd("SADD")
            .arg(accessible_topics_key(topic.owner_id))
            .arg(&topic.topic_name)
            .query_async(&mut conn)
            .await?;

        tracing::info!(topic = %topic.topic_name, owner = %topic.owner_id, "Created topic");
        Ok(Claim::Created(topic))
    }

    async fn get_topic(&self, topic_name: &str) -> Result<Option<Topic>, StoreError> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = deadpool_redis::redis::cmd("HGETALL")
            .arg(topic_key(topic_name))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let members: Vec<String> = deadpool_redis::redis::cmd("SMEMBERS")
            .arg(allowed_users_key(topic_name))
            .query_async(&mut conn)
            .await?;
        let allowed: BTreeSet<Uuid> = members
            .iter()
            .filter_map(|raw| Uuid::parse_str(raw).ok())
            .collect();

        Ok(Self::topic_from_hash(fields, allowed))
    }

    async fn update_topic(
        &self,
        topic_name: &str,
        is_public: Option<bool>,
        description: Option<String>,
    ) -> Result<Option<Topic>, StoreError> {
        let key = topic_key(topic_name);
        let mut conn = self.pool.get().await?;

        let exists: i64 = deadpool_redis::redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await?;
        if exists == 0 {
            return Ok(None);
        }

        let mut cmd = deadpool_redis::redis::cmd("HSET");
        cmd.arg(&key);
        let mut dirty = false;
        if let Some(public) = is_public {
            cmd.arg("is_public").arg(public.to_string());
            dirty = true;
        }
        if let Some(desc) = description {
            cmd.arg("description").arg(desc);
            dirty = true;
        }
        if dirty {
            let _: i64 = cmd.query_async(&mut conn).await?;
        }
        drop(conn);

        self.get_topic(topic_name).await
    }

    async fn delete_topic(&self, topic_name: &str) -> Result<bool, StoreError> {
        let Some(topic) = self.get_topic(topic_name).await? else {
            return Ok(false);
        };

        let mut conn = self.pool.get().await?;
        let _: i64 = deadpool_redis::redis::cmd("DEL")
            .arg(topic_key(topic_name))
            .arg(allowed_users_key(topic_name))
            .query_async(&mut conn)
            .await?;
        let _: i64 = deadpool_redis::redis::cmd("SREM")
            .arg(owned_topics_key(topic.owner_id))
            .arg(topic_name)
            .query_async(&mut conn)
            .await?;
        let _: i64 = deadpool_redis::redis::cmd("SREM")
            .arg(accessible_topics_key(topic.owner_id))
            .arg(topic_name)
            .query_async(&mut conn)
            .await?;
        for user_id in &topic.allowed_user_ids {
            let _: i64 = deadpool_redis::redis::cmd("SREM")
                .arg(accessible_topics_key(*user_id))
                .arg(topic_name)
                .query_async(&mut conn)
                .await?;
        }

        tracing::info!(topic = %topic_name, "Deleted topic");
        Ok(true)
    }

    async fn grant_access(
        &self,
        topic_name: &str,
        user_id: Uuid,
    ) -> Result<GrantOutcome, StoreError> {
        if self.get_topic(topic_name).await?.is_none() {
            return Ok(GrantOutcome::TopicNotFound);
        }

        let mut conn = self.pool.get().await?;
        let added: i64 = deadpool_redis::redis::cmd("SADD")
            .arg(allowed_users_key(topic_name))
            .arg(user_id.to_string())
            .query_async(&mut conn)
            .await?;
        if added == 0 {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let _: i64 = deadpool_redis::redis::cmd("SADD")
            .arg(accessible_topics_key(user_id))
            .arg(topic_name)
            .query_async(&mut conn)
            .await?;
        Ok(GrantOutcome::Granted)
    }

    async fn revoke_access(&self, topic_name: &str, user_id: Uuid) -> Result<bool, StoreError> {
        if self.get_topic(topic_name).await?.is_none() {
            return Ok(false);
        }

        let mut conn = self.pool.get().await?;
        let removed: i64 = deadpool_redis::redis::cmd("SREM")
            .arg(allowed_users_key(topic_name))
            .arg(user_id.to_string())
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Ok(false);
        }

        let _: i64 = deadpool_redis::redis::cmd("SREM")
            .arg(accessible_topics_key(user_id))
            .arg(topic_name)
            .query_async(&mut conn)
            .await?;
        Ok(true)
    }

    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError> {
        let mut conn = self.pool.get().await?;
        let names: Vec<String> = deadpool_redis::redis::cmd("SMEMBERS")
            .arg(owned_topics_key(user_id))
            .query_async(&mut conn)
            .await?;
        drop(conn);

        let mut topics = Vec::with_capacity(names.len());
        for name in names {
            if let Some(topic) = self.get_topic(&name).await? {
                topics.push(topic);
            }
        }
        topics.sort_by(|a, b| a.topic_name.cmp(&b.topic_name));
        Ok(topics)
    }

    async fn list_accessible(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError> {
        let mut conn = self.pool.get().await?;
        let names: Vec<String> = deadpool_redis::redis::cmd("SMEMBERS")
            .arg(accessible_topics_key(user_id))
            .query_async(&mut conn)
            .await?;
        drop(conn);

        let mut topics = Vec::with_capacity(names.len());
        for name in names {
            if let Some(topic) = self.get_topic(&name).await? {
                topics.push(topic);
            }
        }
        topics.sort_by(|a, b| a.topic_name.cmp(&b.topic_name));
        Ok(topics)
    }
}
