//! CRUD operations for cached [`Message`] rows.

use rusqlite::{params, OptionalExtension};

use ripple_shared::{ChatId, MediaType, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DeliveryState, Message};

const SELECT_COLUMNS: &str = "SELECT message_id, chat_id, sender_id, text, timestamp, edited,
        media_url, is_media, media_type, delivery_state
 FROM messages";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a message, or replace every column of the row with the same id.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (message_id, chat_id, sender_id, text, timestamp, edited,
                                   media_url, is_media, media_type, delivery_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(message_id) DO UPDATE SET
                 chat_id        = excluded.chat_id,
                 sender_id      = excluded.sender_id,
                 text           = excluded.text,
                 timestamp      = excluded.timestamp,
                 edited         = excluded.edited,
                 media_url      = excluded.media_url,
                 is_media       = excluded.is_media,
                 media_type     = excluded.media_type,
                 delivery_state = excluded.delivery_state",
            params![
                message.id.as_str(),
                message.chat_id.as_str(),
                message.sender_id.as_str(),
                message.text,
                message.timestamp,
                message.edited as i32,
                message.media_url,
                message.is_media as i32,
                message.media_type.map(|t| t.as_str()),
                message.delivery.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Returns `true` if a row was updated.
    pub fn set_delivery_state(&self, id: &MessageId, state: DeliveryState) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET delivery_state = ?1 WHERE message_id = ?2",
            params![state.as_str(), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE message_id = ?1"),
                params![id.as_str()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All messages of a chat, oldest first. Ties on timestamp are broken by
    /// id so the order is stable across emissions.
    pub fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE chat_id = ?1 ORDER BY timestamp ASC, message_id ASC"
        ))?;

        let rows = stmt.query_map(params![chat_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn last_message_timestamp(&self, chat_id: &ChatId) -> Result<Option<i64>> {
        let ts = self.conn().query_row(
            "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
            params![chat_id.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    /// Chat id of a cached message, if the message is cached.
    pub fn chat_of_message(&self, id: &MessageId) -> Result<Option<ChatId>> {
        let chat = self
            .conn()
            .query_row(
                "SELECT chat_id FROM messages WHERE message_id = ?1",
                params![id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(chat.map(ChatId))
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message by id.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE message_id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete every row of a chat, returning how many were removed.
    pub fn clear_chat(&self, chat_id: &ChatId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![chat_id.as_str()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let text: String = row.get(3)?;
    let timestamp: i64 = row.get(4)?;
    let edited: i32 = row.get(5)?;
    let media_url: Option<String> = row.get(6)?;
    let is_media: i32 = row.get(7)?;
    let media_type_str: Option<String> = row.get(8)?;
    let delivery_str: String = row.get(9)?;

    let media_type = media_type_str
        .map(|s| s.parse::<MediaType>())
        .transpose()
        .map_err(|e| conversion_error(8, e))?;

    let delivery = delivery_str.parse::<DeliveryState>().map_err(|e| {
        conversion_error(
            9,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;

    Ok(Message {
        id: MessageId(id),
        chat_id: ChatId(chat_id),
        sender_id: UserId(sender_id),
        text,
        timestamp,
        edited: edited != 0,
        media_url,
        is_media: is_media != 0,
        media_type,
        delivery,
    })
}
