//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use murmur_shared::{AttachmentInfo, Handle, MessageEvent, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Normalized email handle; unique across accounts.
    pub email: Handle,
    /// Argon2 PHC string. Never serialized.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. `recipient_id == None` means the general channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub recipient_id: Option<UserId>,
    /// May be empty when an attachment is present.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Project the message onto the live-channel wire event.
    pub fn to_event(&self) -> MessageEvent {
        MessageEvent {
            user_id: self.sender_id.clone(),
            recipient_user_id: self.recipient_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            attachment: self.attachment.as_ref().map(Attachment::info),
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// File metadata owned by exactly one message. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub message_id: Uuid,
    pub uploader_id: UserId,
    /// Original file name as supplied by the uploader.
    pub file_name: String,
    /// Where the blob lives on disk.
    pub storage_path: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn info(&self) -> AttachmentInfo {
        AttachmentInfo {
            file_name: self.file_name.clone(),
            file_path: self.storage_path.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat preview
// ---------------------------------------------------------------------------

/// Latest exchange with one counterpart, computed on read and never stored.
/// Online status is filled in by the caller from the presence cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPreview {
    pub counterpart_id: UserId,
    pub counterpart_email: String,
    pub last_message: String,
    pub last_timestamp: DateTime<Utc>,
}
