use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE messages ADD COLUMN media_url  TEXT;
ALTER TABLE messages ADD COLUMN is_media   INTEGER NOT NULL DEFAULT 0;
ALTER TABLE messages ADD COLUMN media_type TEXT;               -- image | video | file
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
