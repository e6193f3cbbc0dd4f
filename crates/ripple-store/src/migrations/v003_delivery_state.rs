use rusqlite::Connection;

// Rows written before this migration came from the backend, hence 'confirmed'.
const UP_SQL: &str = r#"
ALTER TABLE messages ADD COLUMN delivery_state TEXT NOT NULL DEFAULT 'confirmed';
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
