//! Per-process user lookup cache.
//!
//! Reduces store round-trips on the hot request path. Worker-local: the
//! store stays authoritative and other workers' mutations become visible
//! when the TTL lapses. Mutations performed by this process invalidate the
//! affected entry immediately.

use std::time::Duration;

use moka::sync::Cache;
use uuid::Uuid;

use crate::auth::models::User;

/// TTL + capacity-bounded cache keyed by user id. Cheap to clone; all
/// clones share the same underlying cache.
#[derive(Clone)]
pub struct UserCache {
    cache: Cache<Uuid, User>,
}

impl UserCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        UserCache {
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build(),
        }
    }

    pub fn get(&self, user_id: &Uuid) -> Option<User> {
        self.cache.get(user_id)
    }

    pub fn insert(&self, user: User) {
        self.cache.insert(user.user_id, user);
    }

    pub fn invalidate(&self, user_id: &Uuid) {
        self.cache.invalidate(user_id);
    }
}
