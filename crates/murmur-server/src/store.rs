//! Async facade over the synchronous SQLite store.
//!
//! Every call runs on the blocking pool and is bounded by the configured
//! timeout. A call that times out is guaranteed never to touch the database:
//! the worker claims the call once it holds the lock, and a call that was
//! already claimed when the timer fired is awaited to completion instead.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_shared::{Handle, UserId};
use murmur_store::{ChatPreview, Database, Message, StoreError, User};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::debug;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

#[derive(Debug, Error)]
pub enum StoreCallError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{op} timed out after {after:?}")]
    TimedOut { op: &'static str, after: Duration },

    #[error("store worker failed: {0}")]
    Worker(String),
}

impl StoreCallError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreCallError::Store(StoreError::Conflict(_)))
    }
}

#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Mutex<Database>>,
    timeout: Duration,
}

impl MessageStore {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            timeout,
        }
    }

    pub(crate) async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreCallError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> murmur_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let after = self.timeout;
        let state = Arc::new(AtomicU8::new(PENDING));
        let claim = state.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| StoreCallError::Worker(format!("lock poisoned: {e}")))?;
            if claim
                .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(StoreCallError::TimedOut { op, after });
            }
            f(&guard).map_err(StoreCallError::from)
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                if state
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Err(StoreCallError::TimedOut { op, after });
                }
                // Already running against the database; its outcome is the answer.
                debug!(op, after = ?self.timeout, "Store call outlived its timeout");
                flatten(task.await)
            }
        }
    }

    pub async fn resolve_user_by_handle(
        &self,
        handle: Handle,
    ) -> Result<Option<UserId>, StoreCallError> {
        self.run("resolve_user_by_handle", move |db| {
            db.resolve_user_by_handle(&handle)
        })
        .await
    }

    pub async fn create_user(&self, user: User) -> Result<(), StoreCallError> {
        self.run("create_user", move |db| db.create_user(&user)).await
    }

    /// `Ok(None)` when no account uses `email`.
    pub async fn get_user_by_email(&self, email: Handle) -> Result<Option<User>, StoreCallError> {
        self.run("get_user_by_email", move |db| match db.get_user_by_email(&email) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    /// Persist a message together with its attachment, if any.
    pub async fn record_message(&self, message: Message) -> Result<(), StoreCallError> {
        self.run("record_message", move |db| db.record_message(&message))
            .await
    }

    pub async fn list_general(&self, limit: u32) -> Result<Vec<Message>, StoreCallError> {
        self.run("list_general", move |db| db.list_general(limit))
            .await
    }

    pub async fn list_conversation(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreCallError> {
        self.run("list_conversation", move |db| {
            db.list_conversation(&a, &b, limit)
        })
        .await
    }

    pub async fn list_chat_previews(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<ChatPreview>, StoreCallError> {
        self.run("list_chat_previews", move |db| {
            db.list_chat_previews(&user, limit)
        })
        .await
    }
}

fn flatten<T>(joined: Result<Result<T, StoreCallError>, JoinError>) -> Result<T, StoreCallError> {
    joined.unwrap_or_else(|join| Err(StoreCallError::Worker(join.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_email_is_none() {
        let store = MessageStore::new(Database::open_in_memory().unwrap(), Duration::from_secs(5));
        let found = store
            .get_user_by_email(Handle::parse("nobody@example.com").unwrap())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    fn count_users(db: &Database) -> murmur_store::Result<i64> {
        Ok(db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    #[tokio::test]
    async fn test_queued_call_times_out_and_never_runs() {
        let store = MessageStore::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(100),
        );

        let busy = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .run("busy", |_db| {
                        std::thread::sleep(Duration::from_millis(400));
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ts = murmur_store::database::now();
        let result = store
            .create_user(User {
                id: UserId::new("late"),
                email: Handle::parse("late@example.com").unwrap(),
                password_hash: "x".into(),
                created_at: ts,
                updated_at: ts,
            })
            .await;
        assert!(matches!(
            result,
            Err(StoreCallError::TimedOut { op: "create_user", .. })
        ));

        // The holder outlived its own timeout but had started; it completes.
        busy.await.unwrap().unwrap();

        assert_eq!(store.run("count", count_users).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_started_call_is_awaited_past_timeout() {
        let store = MessageStore::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(20),
        );

        let result = store
            .run("sleepy", |_db| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
    }
}
