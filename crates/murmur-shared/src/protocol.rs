use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Event pushed to live channels once a message has been persisted.
///
/// `recipient_user_id` is always present on the wire and is `null` for
/// messages posted to the general channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub user_id: UserId,
    pub recipient_user_id: Option<UserId>,
    pub content: String,
    /// RFC 3339 timestamp assigned by the server.
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentInfo>,
}

/// Attachment metadata carried alongside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub file_name: String,
    pub file_path: String,
    pub mime_type: String,
}

/// Frame a client sends over its live channel.
///
/// `recipient` is a handle (email), never an internal identifier. A missing
/// or blank recipient addresses the general channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundFrame {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

/// Sent back to the originating channel when a frame could not be accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Machine-readable kind, e.g. `recipient_not_found`.
    pub error: String,
    pub message: String,
}

impl MessageEvent {
    pub fn is_public(&self) -> bool {
        self.recipient_user_id.is_none()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl InboundFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_public_event_has_null_recipient() {
        let event = MessageEvent {
            user_id: UserId::new("u1"),
            recipient_user_id: None,
            content: "hello".into(),
            created_at: Utc::now(),
            attachment: None,
        };

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["user_id"], "u1");
        assert!(value["recipient_user_id"].is_null());
        assert!(value.get("attachment").is_none());
        assert!(event.is_public());

        let stamp = value["created_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_attachment_is_nested() {
        let event = MessageEvent {
            user_id: UserId::new("u1"),
            recipient_user_id: Some(UserId::new("u2")),
            content: String::new(),
            created_at: Utc::now(),
            attachment: Some(AttachmentInfo {
                file_name: "cat.png".into(),
                file_path: "storage/1_cat.png".into(),
                mime_type: "image/png".into(),
            }),
        };

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["recipient_user_id"], "u2");
        assert_eq!(value["attachment"]["file_name"], "cat.png");
        assert_eq!(value["attachment"]["mime_type"], "image/png");
    }

    #[test]
    fn test_inbound_frame_defaults() {
        let frame = InboundFrame::from_json(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(frame.content, "hi");
        assert!(frame.recipient.is_none());

        let frame =
            InboundFrame::from_json(r#"{"content":"hi","recipient":"b@example.com"}"#).unwrap();
        assert_eq!(frame.recipient.as_deref(), Some("b@example.com"));
    }

    #[test]
    fn test_inbound_frame_rejects_garbage() {
        assert!(InboundFrame::from_json("not json").is_err());
        assert!(InboundFrame::from_json(r#"{"content":42}"#).is_err());
    }
}
