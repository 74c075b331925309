//! Queries over the [`Message`] collection.
//!
//! Ordering always falls back to `seq` (insertion order) when two messages
//! share a timestamp, so history order equals acceptance order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use hirewire_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, body, created_at, read";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, body, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.body,
                encode_timestamp(&message.created_at),
                message.read,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Every message exchanged between `a` and `b`, oldest first.
    pub fn get_history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, seq ASC"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Every message `user` sent or received, newest first.
    pub fn get_messages_involving(&self, user: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
             ORDER BY created_at DESC, seq DESC"
        ))?;

        let rows = stmt.query_map(params![user.as_str()], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Number of messages from `sender` to `receiver` not yet read.
    pub fn count_unread(&self, receiver: &UserId, sender: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
            params![sender.as_str(), receiver.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Flip every unread message from `partner` to `reader` to read.
    /// Returns how many rows changed; zero is not an error.
    pub fn mark_read(&self, reader: &UserId, partner: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET read = 1
             WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
            params![partner.as_str(), reader.as_str()],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width UTC encoding so lexical order equals chronological order.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_id: String = row.get(1)?;
    let receiver_id: String = row.get(2)?;
    let body: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let read: bool = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        body,
        created_at,
        read,
    })
}
