//! Derived chat list: one row per private counterpart, latest exchange first.

use murmur_shared::UserId;
use rusqlite::params;

use crate::database::{decode_ts, Database};
use crate::error::Result;
use crate::models::ChatPreview;

impl Database {
    pub fn list_chat_previews(&self, user: &UserId, limit: u32) -> Result<Vec<ChatPreview>> {
        let mut stmt = self.conn().prepare(
            "WITH conv AS (
                 SELECT CASE WHEN user_id = ?1 THEN recipient_user_id ELSE user_id END AS buddy_id,
                        content, created_at, seq
                 FROM messages
                 WHERE recipient_user_id IS NOT NULL
                   AND (user_id = ?1 OR recipient_user_id = ?1)
             ),
             ranked AS (
                 SELECT buddy_id, content, created_at, seq,
                        ROW_NUMBER() OVER (
                            PARTITION BY buddy_id ORDER BY created_at DESC, seq DESC
                        ) AS rn
                 FROM conv
             )
             SELECT r.buddy_id, u.email, r.content, r.created_at
             FROM ranked r
             JOIN users u ON u.id = r.buddy_id
             WHERE r.rn = 1
             ORDER BY r.created_at DESC, r.seq DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user.as_str(), limit], |row| {
            let counterpart: String = row.get(0)?;
            let ts_str: String = row.get(3)?;
            Ok(ChatPreview {
                counterpart_id: UserId::from(counterpart),
                counterpart_email: row.get(1)?,
                last_message: row.get(2)?,
                last_timestamp: decode_ts(&ts_str, 3)?,
            })
        })?;

        let mut previews = Vec::new();
        for row in rows {
            previews.push(row?);
        }
        Ok(previews)
    }
}
