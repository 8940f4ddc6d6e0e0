use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::jwt::TokenSigner;
use crate::auth::models::User;
use crate::cache::UserCache;
use crate::config::Settings;
use crate::error::AppResult;
use crate::hub::{LocalHub, PollHub};
use crate::relay::Coordinator;
use crate::store::{MemoryLog, MemoryTopicStore, MemoryUserStore, MessageLog, TopicStore, UserStore};

/// Shared application state passed to all handlers and extractors.
///
/// Built once at startup and threaded through explicitly — no mutable
/// globals. Every field is either `Arc`-backed or internally shared, so
/// cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub users: Arc<dyn UserStore>,
    pub topics: Arc<dyn TopicStore>,
    pub log: Arc<dyn MessageLog>,
    pub local_hub: LocalHub,
    pub poll_hub: PollHub,
    /// Present only when a cross-process store is configured.
    pub coordinator: Option<Arc<Coordinator>>,
    pub user_cache: UserCache,
    pub signer: TokenSigner,
}

impl AppState {
    /// Compose a state over the in-memory backends (no coordinator). Used
    /// by the `memory` storage backend and by tests.
    pub fn memory(settings: Settings) -> Self {
        let signer = TokenSigner::new(
            &settings.jwt_secret_key,
            &settings.jwt_algorithm,
            settings.jwt_expiration_minutes,
        );
        let user_cache = UserCache::new(
            Duration::from_secs(settings.user_cache_ttl_seconds),
            settings.user_cache_capacity,
        );
        AppState {
            log: Arc::new(MemoryLog::new(settings.max_messages_per_topic)),
            users: Arc::new(MemoryUserStore::new()),
            topics: Arc::new(MemoryTopicStore::new()),
            local_hub: LocalHub::new(),
            poll_hub: PollHub::new(),
            coordinator: None,
            user_cache,
            signer,
            settings: Arc::new(settings),
        }
    }

    /// Fetch a user through the per-process cache; entries install on miss
    /// and expire by TTL. Callers must still check `is_active` on hits.
    pub async fn load_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        if let Some(user) = self.user_cache.get(&user_id) {
            return Ok(Some(user));
        }
        match self.users.get_by_id(user_id).await? {
            Some(user) => {
                self.user_cache.insert(user.clone());
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// True when the cross-worker relay is up; the publish path then routes
    /// fan-out through it instead of the local hubs.
    pub fn relay_running(&self) -> bool {
        self.coordinator
            .as_ref()
            .is_some_and(|coordinator| coordinator.is_running())
    }
}
