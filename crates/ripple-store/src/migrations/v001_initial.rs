//! v001 -- Initial schema creation.
//!
//! Creates the `messages` cache table. One row per message id; rows are
//! replaced wholesale on upsert.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY NOT NULL,   -- backend doc id or client-generated
    chat_id    TEXT NOT NULL,               -- "{lo}-{hi}" participant pair
    sender_id  TEXT NOT NULL,
    text       TEXT NOT NULL,
    timestamp  INTEGER NOT NULL,            -- epoch millis
    edited     INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
