//! In-memory backends for development and tests.
//!
//! All maps live behind per-store locks; name claims happen entirely inside
//! one critical section, which gives the same exactly-one-winner guarantee
//! the production backend gets from conditional hash-field writes.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    Claim, GrantOutcome, MessageLog, StoreError, TopicStore, TopicStoreStats, UserStore,
    UserStoreStats,
};
use crate::auth::models::{Topic, User};
use crate::models::StoredMessage;

// ============================================================================
// Message log
// ============================================================================

struct LogEntry {
    /// Per-topic monotonic sequence; the log's ordering.
    seq: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct TopicLog {
    entries: VecDeque<LogEntry>,
    /// message_id → seq, for O(log n) cursor resolution.
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl TopicLog {
    fn pop_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.index.remove(&entry.message.message_id);
        }
    }
}

/// Bounded in-memory ring per topic. Insertion order is read order and
/// message ids are `msg_<12 hex chars>`.
pub struct MemoryLog {
    topics: Mutex<HashMap<String, TopicLog>>,
    max_messages_per_topic: usize,
}

impl MemoryLog {
    pub fn new(max_messages_per_topic: usize) -> Self {
        MemoryLog {
            topics: Mutex::new(HashMap::new()),
            max_messages_per_topic,
        }
    }

    fn generate_message_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("msg_{}", &hex[..12])
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn append(
        &self,
        topic: &str,
        payload: &Map<String, Value>,
        timestamp: DateTime<Utc>,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<String, StoreError> {
        let mut topics = self.topics.lock().await;
        let log = topics.entry(topic.to_string()).or_default();

        let message_id = Self::generate_message_id();
        let seq = log.next_seq;
        log.next_seq += 1;

        log.index.insert(message_id.clone(), seq);
        log.entries.push_back(LogEntry {
            seq,
            message: StoredMessage {
                message_id: message_id.clone(),
                topic: topic.to_string(),
                payload: Value::Object(payload.clone()),
                timestamp,
                metadata: metadata.cloned(),
            },
        });

        while log.entries.len() > self.max_messages_per_topic {
            log.pop_oldest();
        }

        Ok(message_id)
    }

    async fn range(
        &self,
        topic: &str,
        cursor: Option<&str>,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let limit = limit.min(100);
        let topics = self.topics.lock().await;
        let Some(log) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        // An unknown cursor carries no position in this topic; treat it the
        // same as no cursor at all.
        let cursor_seq = cursor.and_then(|id| log.index.get(id).copied());

        let messages = if reverse {
            // Entries strictly before the cursor, newest first.
            let end = match cursor_seq {
                Some(seq) => log.entries.partition_point(|e| e.seq < seq),
                None => log.entries.len(),
            };
            let start = end.saturating_sub(limit);
            log.entries
                .range(start..end)
                .rev()
                .map(|e| e.message.clone())
                .collect()
        } else {
            // Entries strictly after the cursor, oldest first.
            let start = match cursor_seq {
                Some(seq) => log.entries.partition_point(|e| e.seq <= seq),
                None => 0,
            };
            log.entries
                .range(start..)
                .take(limit)
                .map(|e| e.message.clone())
                .collect()
        };

        Ok(messages)
    }

    async fn len(&self, topic: &str) -> Result<usize, StoreError> {
        let topics = self.topics.lock().await;
        Ok(topics.get(topic).map_or(0, |log| log.entries.len()))
    }

    async fn trim(&self, topic: &str, keep: usize) -> Result<usize, StoreError> {
        let mut topics = self.topics.lock().await;
        let Some(log) = topics.get_mut(topic) else {
            return Ok(0);
        };

        let current = log.entries.len();
        if current <= keep {
            return Ok(0);
        }

        let removed = current - keep;
        for _ in 0..removed {
            log.pop_oldest();
        }
        Ok(removed)
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), StoreError> {
        self.topics.lock().await.remove(topic);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// User store
// ============================================================================

#[derive(Default)]
struct UserMaps {
    users: HashMap<Uuid, User>,
    username_index: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<UserMaps>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: User) -> Result<Claim<User>, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.username_index.contains_key(&user.username) {
            return Ok(Claim::AlreadyExists);
        }
        inner
            .username_index
            .insert(user.username.clone(), user.user_id);
        inner.users.insert(user.user_id, user.clone());
        tracing::info!(username = %user.username, user_id = %user.user_id, "Created user");
        Ok(Claim::Created(user))
    }

    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .username_index
            .get(username)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.user_id) {
            return Err(StoreError::NotFound(format!("user {}", user.user_id)));
        }
        inner.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.users.remove(&user_id) {
            Some(user) => {
                inner.username_index.remove(&user.username);
                tracing::info!(username = %user.username, %user_id, "Deleted user");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn stats(&self) -> Result<Option<UserStoreStats>, StoreError> {
        let inner = self.inner.read().await;
        Ok(Some(UserStoreStats {
            total_users: inner.users.len(),
            active_users: inner.users.values().filter(|u| u.is_active).count(),
        }))
    }
}

// ============================================================================
// Topic store
// ============================================================================

#[derive(Default)]
struct TopicMaps {
    topics: HashMap<String, Topic>,
    /// owner user_id → owned topic names.
    owner_index: HashMap<Uuid, BTreeSet<String>>,
}

#[derive(Default)]
pub struct MemoryTopicStore {
    inner: RwLock<TopicMaps>,
}

impl MemoryTopicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TopicStore for MemoryTopicStore {
    async fn create_topic(&self, topic: Topic) -> Result<Claim<Topic>, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.topics.contains_key(&topic.topic_name) {
            return Ok(Claim::AlreadyExists);
        }
        inner
            .owner_index
            .entry(topic.owner_id)
            .or_default()
            .insert(topic.topic_name.clone());
        inner.topics.insert(topic.topic_name.clone(), topic.clone());
        tracing::info!(topic = %topic.topic_name, owner = %topic.owner_id, "Created topic");
        Ok(Claim::Created(topic))
    }

    async fn get_topic(&self, topic_name: &str) -> Result<Option<Topic>, StoreError> {
        Ok(self.inner.read().await.topics.get(topic_name).cloned())
    }

    async fn update_topic(
        &self,
        topic_name: &str,
        is_public: Option<bool>,
        description: Option<String>,
    ) -> Result<Option<Topic>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(topic) = inner.topics.get_mut(topic_name) else {
            return Ok(None);
        };
        if let Some(public) = is_public {
            topic.is_public = public;
        }
        if let Some(desc) = description {
            topic.description = Some(desc);
        }
        Ok(Some(topic.clone()))
    }

    async fn delete_topic(&self, topic_name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.topics.remove(topic_name) {
            Some(topic) => {
                if let Some(owned) = inner.owner_index.get_mut(&topic.owner_id) {
                    owned.remove(topic_name);
                }
                tracing::info!(topic = %topic_name, "Deleted topic");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn grant_access(
        &self,
        topic_name: &str,
        user_id: Uuid,
    ) -> Result<GrantOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(topic) = inner.topics.get_mut(topic_name) else {
            return Ok(GrantOutcome::TopicNotFound);
        };
        if !topic.allowed_user_ids.insert(user_id) {
            return Ok(GrantOutcome::AlreadyGranted);
        }
        Ok(GrantOutcome::Granted)
    }

    async fn revoke_access(&self, topic_name: &str, user_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(topic) = inner.topics.get_mut(topic_name) else {
            return Ok(false);
        };
        Ok(topic.allowed_user_ids.remove(&user_id))
    }

    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError> {
        let inner = self.inner.read().await;
        let names = inner.owner_index.get(&user_id);
        Ok(names
            .into_iter()
            .flatten()
            .filter_map(|name| inner.topics.get(name))
            .cloned()
            .collect())
    }

    async fn list_accessible(&self, user_id: Uuid) -> Result<Vec<Topic>, StoreError> {
        let inner = self.inner.read().await;
        let mut topics: Vec<Topic> = inner
            .topics
            .values()
            .filter(|t| t.owner_id == user_id || t.allowed_user_ids.contains(&user_id))
            .cloned()
            .collect();
        topics.sort_by(|a, b| a.topic_name.cmp(&b.topic_name));
        Ok(topics)
    }

    async fn stats(&self) -> Result<Option<TopicStoreStats>, StoreError> {
        let inner = self.inner.read().await;
        let public = inner.topics.values().filter(|t| t.is_public).count();
        Ok(Some(TopicStoreStats {
            total_topics: inner.topics.len(),
            public_topics: public,
            private_topics: inner.topics.len() - public,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
