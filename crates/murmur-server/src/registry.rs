//! Live channel bookkeeping: at most one connection per user.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_shared::UserId;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Distinguishes successive connections of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,

    #[error("channel closed")]
    Closed,
}

/// Sending side of one live channel.
///
/// The socket itself belongs to the channel's tasks; the handle only holds
/// the bounded outbound queue drained by the writer and the close signal
/// watched by the reader.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a serialized event without waiting.
    pub fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal both tasks of this channel to stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` for `user`. A previously registered connection is
    /// closed under the same write guard and returned.
    pub async fn add(&self, user: UserId, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        let new_id = conn.id();
        let replaced = entries.insert(user.clone(), conn);

        if let Some(old) = &replaced {
            old.close();
            info!(
                user = %user.short(),
                old = %old.id(),
                new = %new_id,
                "Replaced existing connection"
            );
        }

        debug!(user = %user.short(), connections = entries.len(), "Connection registered");
        replaced
    }

    /// Idempotent.
    pub async fn remove(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.write().await.remove(user)
    }

    /// Remove `user`'s entry only if it is still connection `id`. A channel
    /// that was replaced leaves its successor untouched.
    pub async fn release(&self, user: &UserId, id: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(user) {
            Some(current) if current.id() == id => {
                entries.remove(user);
                debug!(user = %user.short(), connections = entries.len(), "Connection released");
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.read().await.get(user).cloned()
    }

    /// Consistent copy of every registered entry.
    pub async fn snapshot(&self) -> Vec<(UserId, ConnectionHandle)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(user, conn)| (user.clone(), conn.clone()))
            .collect()
    }

    /// Entries for whichever of `users` are connected, in the given order.
    pub async fn select(&self, users: &[UserId]) -> Vec<(UserId, ConnectionHandle)> {
        let entries = self.entries.read().await;
        users
            .iter()
            .filter_map(|user| entries.get(user).map(|conn| (user.clone(), conn.clone())))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
