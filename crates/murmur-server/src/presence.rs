//! Online markers with a fixed time-to-live.
//!
//! Every authenticated request or channel frame refreshes the caller's
//! marker; a user is online while an unexpired marker exists. Readers never
//! extend a marker, and lapsed markers are only dropped by
//! [`PresenceCache::purge_expired`], which cannot change any answer of
//! [`PresenceCache::is_online`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use murmur_shared::UserId;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone)]
pub struct PresenceCache {
    /// user -> instant the marker lapses.
    entries: Arc<RwLock<HashMap<UserId, Instant>>>,
    ttl: Duration,
}

impl PresenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Refresh `user`'s marker with the configured TTL.
    pub async fn mark_online(&self, user: &UserId) {
        self.mark_online_for(user, self.ttl).await;
    }

    pub async fn mark_online_for(&self, user: &UserId, ttl: Duration) {
        let expires = Instant::now() + ttl;
        self.entries.write().await.insert(user.clone(), expires);
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.entries
            .read()
            .await
            .get(user)
            .is_some_and(|expires| *expires > Instant::now())
    }

    /// Drop lapsed markers. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged lapsed presence markers");
        }
        removed
    }
}
