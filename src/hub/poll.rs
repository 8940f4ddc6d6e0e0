//! Registry of HTTP long-poll waiters and their bounded event queues.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

/// Per-waiter queue bound. Overflow drops the oldest undelivered event;
/// clients recover through the `since` cursor on their next poll.
pub const POLL_QUEUE_CAPACITY: usize = 256;

/// A client blocked on `/messages/poll`, waiting for events on its topics.
pub struct PollWaiter {
    waiter_id: String,
    topics: HashSet<String>,
    queue: Mutex<VecDeque<Value>>,
    notify: Notify,
    capacity: usize,
    created_at: DateTime<Utc>,
}

impl PollWaiter {
    fn new(topics: &[String], capacity: usize) -> Self {
        PollWaiter {
            waiter_id: Uuid::new_v4().to_string(),
            topics: topics.iter().cloned().collect(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            created_at: Utc::now(),
        }
    }

    pub fn waiter_id(&self) -> &str {
        &self.waiter_id
    }

    fn enqueue(&self, event: Value) {
        {
            let mut queue = self.queue.lock().expect("poll queue poisoned");
            if queue.len() >= self.capacity {
                queue.pop_front();
                tracing::warn!(
                    waiter_id = %self.waiter_id,
                    "Poll queue full, dropping oldest event"
                );
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Block up to `timeout` for the first event, then drain everything
    /// immediately available. An empty batch on timeout is a normal
    /// outcome.
    pub async fn wait_for_messages(&self, timeout: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queue = self.queue.lock().expect("poll queue poisoned");
                if !queue.is_empty() {
                    return queue.drain(..).collect();
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Vec::new();
            }
        }
    }
}

#[derive(Default)]
struct PollMaps {
    by_waiter: HashMap<String, Arc<PollWaiter>>,
    by_topic: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Serialize)]
pub struct PollStats {
    pub active_waiters: usize,
    pub subscribed_topics: usize,
    pub topic_subscriber_counts: BTreeMap<String, usize>,
}

/// Tracks long-poll waiters per topic and fans events into their queues.
#[derive(Clone)]
pub struct PollHub {
    inner: Arc<RwLock<PollMaps>>,
    queue_capacity: usize,
}

impl Default for PollHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PollHub {
    pub fn new() -> Self {
        Self::with_queue_capacity(POLL_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        PollHub {
            inner: Arc::new(RwLock::new(PollMaps::default())),
            queue_capacity,
        }
    }

    pub async fn create_waiter(&self, topics: &[String]) -> Arc<PollWaiter> {
        let waiter = Arc::new(PollWaiter::new(topics, self.queue_capacity));
        let mut inner = self.inner.write().await;
        inner
            .by_waiter
            .insert(waiter.waiter_id.clone(), Arc::clone(&waiter));
        for topic in &waiter.topics {
            inner
                .by_topic
                .entry(topic.clone())
                .or_default()
                .insert(waiter.waiter_id.clone());
        }
        tracing::debug!(waiter_id = %waiter.waiter_id, ?topics, "Created poll waiter");
        waiter
    }

    /// Deregister a waiter from every topic. A waiter is either registered
    /// here with a caller blocked on its queue, or removed — never a third
    /// state.
    pub async fn remove_waiter(&self, waiter_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(waiter) = inner.by_waiter.remove(waiter_id) {
            for topic in &waiter.topics {
                if let Some(ids) = inner.by_topic.get_mut(topic) {
                    ids.remove(waiter_id);
                    if ids.is_empty() {
                        inner.by_topic.remove(topic);
                    }
                }
            }
            tracing::debug!(waiter_id, "Removed poll waiter");
        }
    }

    /// Enqueue an event to every waiter subscribed to `topic`; returns how
    /// many queues received it. Enqueueing never blocks the hub.
    pub async fn broadcast(&self, topic: &str, event: &Value) -> usize {
        let waiters: Vec<Arc<PollWaiter>> = {
            let inner = self.inner.read().await;
            let Some(ids) = inner.by_topic.get(topic) else {
                return 0;
            };
            ids.iter()
                .filter_map(|id| inner.by_waiter.get(id).cloned())
                .collect()
        };

        for waiter in &waiters {
            waiter.enqueue(event.clone());
        }
        waiters.len()
    }

    /// Drop waiters older than `max_age`. The poll request path removes its
    /// own waiter on every exit; this catches any left behind.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .by_waiter
                .values()
                .filter(|w| {
                    (now - w.created_at).num_milliseconds() as u128 > max_age.as_millis()
                })
                .map(|w| w.waiter_id.clone())
                .collect()
        };

        for waiter_id in &stale {
            self.remove_waiter(waiter_id).await;
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Reaped stale poll waiters");
        }
        stale.len()
    }

    pub async fn stats(&self) -> PollStats {
        let inner = self.inner.read().await;
        PollStats {
            active_waiters: inner.by_waiter.len(),
            subscribed_topics: inner.by_topic.len(),
            topic_subscriber_counts: inner
                .by_topic
                .iter()
                .map(|(topic, ids)| (topic.clone(), ids.len()))
                .collect(),
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
