use murmur_shared::UserId;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message};

const SELECT_MESSAGE: &str = "
    SELECT m.id, m.user_id, m.recipient_user_id, m.content, m.created_at,
           a.user_id, a.file_path, a.file_name, a.mime_type
    FROM messages m
    LEFT JOIN attachments a ON a.message_id = m.id";

impl Database {
    /// Append a message row without an attachment.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        insert_message_row(self.conn(), message)
    }

    pub fn insert_attachment(&self, attachment: &Attachment) -> Result<()> {
        insert_attachment_row(self.conn(), attachment)
    }

    /// Persist a message and its attachment (if any) as one unit: either both
    /// rows land or neither does.
    pub fn record_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        insert_message_row(&tx, message)?;
        if let Some(attachment) = &message.attachment {
            insert_attachment_row(&tx, attachment)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Public channel history, newest first.
    pub fn list_general(&self, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE}
             WHERE m.recipient_user_id IS NULL
             ORDER BY m.created_at DESC, m.seq DESC
             LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![limit], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Private exchange between `a` and `b` in either direction, newest first.
    pub fn list_conversation(&self, a: &UserId, b: &UserId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE}
             WHERE (m.user_id = ?1 AND m.recipient_user_id = ?2)
                OR (m.user_id = ?2 AND m.recipient_user_id = ?1)
             ORDER BY m.created_at DESC, m.seq DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str(), limit], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn insert_message_row(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, user_id, recipient_user_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id.to_string(),
            message.sender_id.as_str(),
            message.recipient_id.as_ref().map(UserId::as_str),
            message.content,
            encode_ts(&message.created_at),
        ],
    )
    .map_err(|e| StoreError::from_insert(e, &format!("message {}", message.id)))?;
    Ok(())
}

fn insert_attachment_row(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        "INSERT INTO attachments (message_id, user_id, file_path, file_name, mime_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            attachment.message_id.to_string(),
            attachment.uploader_id.as_str(),
            attachment.storage_path,
            attachment.file_name,
            attachment.mime_type,
            encode_ts(&crate::database::now()),
        ],
    )
    .map_err(|e| StoreError::from_insert(e, &format!("attachment for {}", attachment.message_id)))?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let recipient: Option<String> = row.get(2)?;
    let content: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let uploader: Option<String> = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let attachment = match uploader {
        Some(uploader) => Some(Attachment {
            message_id: id,
            uploader_id: UserId::from(uploader),
            storage_path: row.get(6)?,
            file_name: row.get(7)?,
            mime_type: row.get(8)?,
        }),
        None => None,
    };

    Ok(Message {
        id,
        sender_id: UserId::from(sender),
        recipient_id: recipient.map(UserId::from),
        content,
        created_at: decode_ts(&ts_str, 4)?,
        attachment,
    })
}
