//! Message ingestion: validate, resolve the recipient, store the attachment,
//! persist, then fan out. Shared by the HTTP handlers and the live channel.

use std::sync::Arc;

use bytes::Bytes;
use murmur_shared::{Handle, MessageEvent, UserId};
use murmur_store::{database::now, Attachment, Message};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::fanout::{DeliveryReport, FanOut};
use crate::store::MessageStore;

/// One message as submitted by an authenticated sender.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub content: String,
    /// Recipient handle; `None` or blank addresses the general channel.
    pub recipient: Option<String>,
    pub attachment: Option<AttachmentUpload>,
}

#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct Accepted {
    pub message_id: Uuid,
    pub event: MessageEvent,
    pub report: DeliveryReport,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message has neither content nor attachment")]
    EmptyMessage,

    #[error("cannot send a private message to yourself")]
    SelfAddressed,

    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("recipient lookup failed: {0}")]
    ResolveFailed(String),

    #[error("attachment could not be stored: {0}")]
    AttachmentStoreFailed(String),

    #[error("message could not be saved: {0}")]
    PersistFailed(String),
}

impl IngestError {
    /// Stable machine-readable name, used in error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::EmptyMessage => "empty_message",
            IngestError::SelfAddressed => "self_addressed",
            IngestError::RecipientNotFound(_) => "recipient_not_found",
            IngestError::ResolveFailed(_) => "store_failure",
            IngestError::AttachmentStoreFailed(_) => "attachment_store_failed",
            IngestError::PersistFailed(_) => "store_failure",
        }
    }

    /// Text safe to show the sender; store details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            IngestError::ResolveFailed(_) | IngestError::PersistFailed(_) => {
                "message could not be saved".to_string()
            }
            IngestError::AttachmentStoreFailed(_) => "attachment could not be stored".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    store: MessageStore,
    blobs: Arc<BlobStore>,
    fanout: FanOut,
}

impl Ingestor {
    pub fn new(store: MessageStore, blobs: Arc<BlobStore>, fanout: FanOut) -> Self {
        Self {
            store,
            blobs,
            fanout,
        }
    }

    pub async fn submit(
        &self,
        sender: &UserId,
        submission: Submission,
    ) -> Result<Accepted, IngestError> {
        let Submission {
            content,
            recipient,
            attachment,
        } = submission;

        if content.trim().is_empty() && attachment.is_none() {
            return Err(IngestError::EmptyMessage);
        }

        let recipient_id = match recipient.as_deref().and_then(Handle::parse) {
            None => None,
            Some(handle) => Some(self.resolve(sender, handle).await?),
        };

        let message_id = Uuid::new_v4();

        let attachment = match attachment {
            None => None,
            Some(upload) => Some(self.store_blob(sender, message_id, upload).await?),
        };

        let message = Message {
            id: message_id,
            sender_id: sender.clone(),
            recipient_id,
            content,
            created_at: now(),
            attachment,
        };

        // A store error here, timeouts included, means nothing was written.
        if let Err(e) = self.store.record_message(message.clone()).await {
            warn!(id = %message_id, error = %e, "Failed to persist message");
            if let Some(attachment) = &message.attachment {
                self.discard_blob(&attachment.storage_path).await;
            }
            return Err(IngestError::PersistFailed(e.to_string()));
        }

        let event = message.to_event();
        let report = self.fanout.deliver(&event).await;

        info!(
            id = %message_id,
            sender = %sender.short(),
            public = event.is_public(),
            attachment = event.attachment.is_some(),
            delivered = report.delivered.len(),
            "Message accepted"
        );

        Ok(Accepted {
            message_id,
            event,
            report,
        })
    }

    async fn resolve(&self, sender: &UserId, handle: Handle) -> Result<UserId, IngestError> {
        let label = handle.to_string();
        let resolved = self
            .store
            .resolve_user_by_handle(handle)
            .await
            .map_err(|e| IngestError::ResolveFailed(e.to_string()))?;

        match resolved {
            None => {
                debug!(recipient = %label, "Recipient does not resolve");
                Err(IngestError::RecipientNotFound(label))
            }
            Some(id) if id == *sender => Err(IngestError::SelfAddressed),
            Some(id) => Ok(id),
        }
    }

    async fn store_blob(
        &self,
        sender: &UserId,
        message_id: Uuid,
        upload: AttachmentUpload,
    ) -> Result<Attachment, IngestError> {
        let path = self
            .blobs
            .store_attachment(&upload.file_name, &upload.data)
            .await
            .map_err(|e| IngestError::AttachmentStoreFailed(e.to_string()))?;

        let mime_type = if upload.mime_type.trim().is_empty() {
            "application/octet-stream".to_string()
        } else {
            upload.mime_type
        };

        Ok(Attachment {
            message_id,
            uploader_id: sender.clone(),
            file_name: upload.file_name,
            storage_path: path.to_string_lossy().into_owned(),
            mime_type,
        })
    }

    /// Best effort: the message is already lost, an orphan file is only clutter.
    async fn discard_blob(&self, storage_path: &str) {
        if let Err(e) = self.blobs.remove(std::path::Path::new(storage_path)).await {
            warn!(path = %storage_path, error = %e, "Failed to remove orphaned attachment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, ConnectionRegistry};
    use murmur_store::{Database, User};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        ingest: Ingestor,
        store: MessageStore,
        registry: ConnectionRegistry,
        dir: TempDir,
    }

    async fn harness(users: &[(&str, &str)]) -> Harness {
        harness_with_timeout(users, Duration::from_secs(5)).await
    }

    async fn harness_with_timeout(users: &[(&str, &str)], store_timeout: Duration) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let ts = now();
        for (id, email) in users {
            db.create_user(&User {
                id: UserId::new(*id),
                email: Handle::parse(email).unwrap(),
                password_hash: "x".into(),
                created_at: ts,
                updated_at: ts,
            })
            .unwrap();
        }

        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path().join("storage"), 1024, Duration::from_secs(5))
            .await
            .unwrap();
        let store = MessageStore::new(db, store_timeout);
        let registry = ConnectionRegistry::new();
        let ingest = Ingestor::new(store.clone(), Arc::new(blobs), FanOut::new(registry.clone()));
        Harness {
            ingest,
            store,
            registry,
            dir,
        }
    }

    async fn connect(registry: &ConnectionRegistry, id: &str) -> mpsc::Receiver<Arc<str>> {
        let (conn, rx) = ConnectionHandle::new(8);
        registry.add(UserId::new(id), conn).await;
        rx
    }

    fn text(content: &str, recipient: Option<&str>) -> Submission {
        Submission {
            content: content.to_string(),
            recipient: recipient.map(str::to_string),
            attachment: None,
        }
    }

    const USERS: &[(&str, &str)] = &[
        ("u1", "a@example.com"),
        ("u2", "b@example.com"),
        ("u3", "c@example.com"),
        ("u4", "d@example.com"),
    ];

    #[tokio::test]
    async fn test_private_message_scenario() {
        let h = harness(USERS).await;
        let mut a = connect(&h.registry, "u1").await;
        let mut b = connect(&h.registry, "u2").await;
        let mut c = connect(&h.registry, "u3").await;

        let accepted = h
            .ingest
            .submit(&UserId::new("u1"), text("hi", Some("B@example.com")))
            .await
            .unwrap();

        assert_eq!(accepted.event.recipient_user_id, Some(UserId::new("u2")));
        assert!(a.try_recv().unwrap().contains("\"hi\""));
        assert!(b.try_recv().unwrap().contains("\"hi\""));
        assert!(c.try_recv().is_err());

        let rows = h
            .store
            .list_conversation(UserId::new("u1"), UserId::new("u2"), 50)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender_id, UserId::new("u1"));
        assert_eq!(rows[0].content, "hi");
    }

    #[tokio::test]
    async fn test_public_message_persisted_for_offline_user() {
        let h = harness(USERS).await;
        let mut a = connect(&h.registry, "u1").await;

        h.ingest
            .submit(&UserId::new("u1"), text("hello", None))
            .await
            .unwrap();

        assert!(a.try_recv().is_ok());
        let general = h.store.list_general(50).await.unwrap();
        assert_eq!(general[0].content, "hello");
        assert!(general[0].recipient_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_recipient_persists_nothing() {
        let h = harness(USERS).await;
        let mut a = connect(&h.registry, "u1").await;

        let err = h
            .ingest
            .submit(&UserId::new("u1"), text("hi", Some("ghost@example.com")))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::RecipientNotFound(ref r) if r == "ghost@example.com"));
        assert!(a.try_recv().is_err());
        assert!(h.store.list_general(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejections() {
        let h = harness(USERS).await;

        let empty = h.ingest.submit(&UserId::new("u1"), text("   ", None)).await;
        assert!(matches!(empty, Err(IngestError::EmptyMessage)));

        let to_self = h
            .ingest
            .submit(&UserId::new("u1"), text("me", Some("a@example.com")))
            .await;
        assert!(matches!(to_self, Err(IngestError::SelfAddressed)));
    }

    #[tokio::test]
    async fn test_blank_recipient_is_public() {
        let h = harness(USERS).await;
        let accepted = h
            .ingest
            .submit(&UserId::new("u1"), text("hey all", Some("  ")))
            .await
            .unwrap();
        assert!(accepted.event.is_public());
    }

    #[tokio::test]
    async fn test_attachment_only_message() {
        let h = harness(USERS).await;
        let submission = Submission {
            content: String::new(),
            recipient: Some("b@example.com".into()),
            attachment: Some(AttachmentUpload {
                file_name: "cat.png".into(),
                mime_type: "image/png".into(),
                data: Bytes::from_static(b"\x89PNG"),
            }),
        };

        let accepted = h.ingest.submit(&UserId::new("u1"), submission).await.unwrap();
        let info = accepted.event.attachment.clone().unwrap();
        assert_eq!(info.file_name, "cat.png");
        assert!(std::path::Path::new(&info.file_path).exists());

        let rows = h
            .store
            .list_conversation(UserId::new("u2"), UserId::new("u1"), 50)
            .await
            .unwrap();
        assert_eq!(rows[0].attachment.as_ref().unwrap().mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_persist_failure_removes_blob_and_skips_delivery() {
        let h = harness(USERS).await;
        let mut a = connect(&h.registry, "u1").await;
        h.store
            .run("break_schema", |db| {
                db.conn().execute_batch("DROP TABLE attachments")?;
                Ok(())
            })
            .await
            .unwrap();

        let submission = Submission {
            content: "see file".into(),
            recipient: None,
            attachment: Some(AttachmentUpload {
                file_name: "doc.txt".into(),
                mime_type: "text/plain".into(),
                data: Bytes::from_static(b"data"),
            }),
        };
        let err = h.ingest.submit(&UserId::new("u1"), submission).await.unwrap_err();

        assert!(matches!(err, IngestError::PersistFailed(_)));
        assert!(a.try_recv().is_err());
        let leftover = std::fs::read_dir(h.dir.path().join("storage")).unwrap().count();
        assert_eq!(leftover, 0);

        let rows: i64 = h
            .store
            .run("count", |db| {
                Ok(db
                    .conn()
                    .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    fn count_messages(db: &Database) -> murmur_store::Result<i64> {
        Ok(db
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    #[tokio::test]
    async fn test_timed_out_persist_never_commits_later() {
        let h = harness_with_timeout(USERS, Duration::from_millis(100)).await;
        let mut a = connect(&h.registry, "u1").await;

        let busy = {
            let store = h.store.clone();
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

        let submission = Submission {
            content: "see file".into(),
            recipient: None,
            attachment: Some(AttachmentUpload {
                file_name: "doc.txt".into(),
                mime_type: "text/plain".into(),
                data: Bytes::from_static(b"data"),
            }),
        };
        let err = h.ingest.submit(&UserId::new("u1"), submission).await.unwrap_err();
        assert!(matches!(err, IngestError::PersistFailed(_)));

        busy.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.store.run("count", count_messages).await.unwrap(), 0);
        assert!(a.try_recv().is_err());
        let leftover = std::fs::read_dir(h.dir.path().join("storage")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_public_message_hides_store_details() {
        let err = IngestError::PersistFailed("database is locked".into());
        assert_eq!(err.kind(), "store_failure");
        assert!(!err.public_message().contains("locked"));
    }
}
