//! v001 -- Initial schema creation.
//!
//! Creates `users`, `messages` and `attachments`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    email         TEXT NOT NULL UNIQUE,       -- normalized handle
    password_hash TEXT NOT NULL,              -- argon2 PHC string
    created_at    TEXT NOT NULL,              -- RFC-3339, microseconds
    updated_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    id                TEXT NOT NULL UNIQUE,               -- UUID v4
    user_id           TEXT NOT NULL,                      -- sender
    recipient_user_id TEXT,                               -- NULL = general channel
    content           TEXT NOT NULL DEFAULT '',
    created_at        TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (recipient_user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_general
    ON messages(created_at DESC) WHERE recipient_user_id IS NULL;

CREATE INDEX IF NOT EXISTS idx_messages_pair
    ON messages(user_id, recipient_user_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_recipient
    ON messages(recipient_user_id, created_at DESC);

-- ----------------------------------------------------------------
-- Attachments (one per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attachments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    user_id    TEXT NOT NULL,              -- uploader
    file_path  TEXT NOT NULL,
    file_name  TEXT NOT NULL,
    mime_type  TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
