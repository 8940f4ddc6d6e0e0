//! In-process registry of live WebSocket sessions, keyed by topic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

#[derive(Default)]
struct HubMaps {
    /// topic → subscribed session ids.
    by_topic: HashMap<String, HashSet<String>>,
    /// session id → outbound channel + subscribed topics.
    by_session: HashMap<String, SessionEntry>,
}

struct SessionEntry {
    sender: mpsc::UnboundedSender<String>,
    topics: HashSet<String>,
}

/// Tracks which WebSocket sessions subscribe to which topics.
///
/// Cheaply cloneable — all clones share the same maps via `Arc`. Both maps
/// are guarded by one lock; the lock is never held across a delivery.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<RwLock<HubMaps>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound channel and subscribe it to `topics`.
    pub async fn connect(
        &self,
        session_id: &str,
        sender: mpsc::UnboundedSender<String>,
        topics: &[String],
    ) {
        let mut inner = self.inner.write().await;
        let entry = inner
            .by_session
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                sender,
                topics: HashSet::new(),
            });
        for topic in topics {
            entry.topics.insert(topic.clone());
        }
        for topic in topics {
            inner
                .by_topic
                .entry(topic.clone())
                .or_default()
                .insert(session_id.to_string());
        }
        tracing::info!(session_id, ?topics, "Session subscribed");
    }

    /// Unsubscribe a session from the given topics; empty topic sets are
    /// dropped.
    pub async fn unsubscribe(&self, session_id: &str, topics: &[String]) {
        let mut inner = self.inner.write().await;
        for topic in topics {
            if let Some(sessions) = inner.by_topic.get_mut(topic) {
                sessions.remove(session_id);
                if sessions.is_empty() {
                    inner.by_topic.remove(topic);
                }
            }
        }
        if let Some(entry) = inner.by_session.get_mut(session_id) {
            for topic in topics {
                entry.topics.remove(topic);
            }
        }
        tracing::info!(session_id, ?topics, "Session unsubscribed");
    }

    /// Remove a session from every topic. Runs on every connection exit
    /// path.
    pub async fn disconnect(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.by_session.remove(session_id) {
            for topic in entry.topics {
                if let Some(sessions) = inner.by_topic.get_mut(&topic) {
                    sessions.remove(session_id);
                    if sessions.is_empty() {
                        inner.by_topic.remove(&topic);
                    }
                }
            }
            tracing::info!(session_id, "Session disconnected");
        }
    }

    /// Deliver an event to every session subscribed to `topic`; returns the
    /// number of successful deliveries.
    ///
    /// Two phases: snapshot the subscriber set under the lock, deliver with
    /// the lock released, then evict the sessions whose channels failed.
    pub async fn broadcast(&self, topic: &str, event: &serde_json::Value) -> usize {
        let text = event.to_string();

        let targets: Vec<(String, mpsc::UnboundedSender<String>)> = {
            let inner = self.inner.read().await;
            let Some(sessions) = inner.by_topic.get(topic) else {
                return 0;
            };
            sessions
                .iter()
                .filter_map(|id| {
                    inner
                        .by_session
                        .get(id)
                        .map(|entry| (id.clone(), entry.sender.clone()))
                })
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (session_id, sender) in targets {
            if sender.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(session_id, topic, "Failed to deliver to session");
                dead.push(session_id);
            }
        }

        for session_id in dead {
            self.disconnect(&session_id).await;
        }

        delivered
    }

    /// Topics a session is currently subscribed to.
    pub async fn session_topics(&self, session_id: &str) -> HashSet<String> {
        let inner = self.inner.read().await;
        inner
            .by_session
            .get(session_id)
            .map(|entry| entry.topics.clone())
            .unwrap_or_default()
    }

    /// Number of sessions subscribed to `topic`, or total sessions when
    /// `topic` is `None`.
    pub async fn connection_count(&self, topic: Option<&str>) -> usize {
        let inner = self.inner.read().await;
        match topic {
            Some(topic) => inner.by_topic.get(topic).map_or(0, HashSet::len),
            None => inner.by_session.len(),
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
