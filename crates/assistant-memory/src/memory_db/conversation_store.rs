use crate::error::StoreResult;
use crate::memory_db::schema::*;
use crate::memory_db::{DbConnection, DbPool};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::debug;

const MESSAGE_COLUMNS: &str = "m.id, m.session_id, m.timestamp, m.role, m.content";

/// Append-only, per-session message history
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Insert one message. Tool content is stored verbatim.
    pub fn append(&self, session_id: &str, role: Role, content: &str) -> StoreResult<StoredMessage> {
        let conn = self.get_conn()?;
        Self::append_with_conn(&conn, session_id, role, content)
    }

    pub(crate) fn append_with_conn(
        conn: &Connection,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> StoreResult<StoredMessage> {
        let now = Utc::now();
        conn.execute(
            "INSERT INTO messages (session_id, timestamp, role, content) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, format_timestamp(&now), role, content],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Appended {} message {} to session {}", role, id, session_id);

        Ok(StoredMessage {
            id,
            session_id: session_id.to_string(),
            timestamp: now,
            role,
            content: content.to_string(),
        })
    }

    /// The latest `limit` messages of a session, returned oldest-first.
    pub fn read(&self, session_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages m
             WHERE m.session_id = ?1
             ORDER BY m.timestamp DESC, m.id DESC
             LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let mut messages = stmt
            .query_map(params![session_id, limit as i64], row_to_stored_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Case-insensitive (Unicode-aware) substring search over every session's
    /// user and assistant messages, newest first. Tool envelopes are never matched.
    pub fn search_all(&self, substring: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, s.started_at
             FROM messages m
             JOIN sessions s ON m.session_id = s.id
             WHERE m.role IN ('user', 'assistant')
               AND fold_case(m.content) LIKE ?1 ESCAPE '\\'
             ORDER BY m.timestamp DESC, m.id DESC
             LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let hits = stmt
            .query_map(params![like_pattern(substring), limit as i64], |row| {
                Ok(SearchHit {
                    message: row_to_stored_message(row)?,
                    session_started_at: timestamp_column(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Cross-session search for '{}' matched {} messages", substring, hits.len());
        Ok(hits)
    }

    /// Case-insensitive search within one session, oldest-first.
    pub fn search_session(&self, session_id: &str, substring: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages m
             WHERE m.session_id = ?1
               AND m.role IN ('user', 'assistant')
               AND fold_case(m.content) LIKE ?2 ESCAPE '\\'
             ORDER BY m.timestamp ASC, m.id ASC
             LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![session_id, like_pattern(substring), limit as i64], row_to_stored_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn message_count(&self, session_id: &str) -> StoreResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

pub(crate) fn row_to_stored_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: timestamp_column(row, 2)?,
        role: row.get(3)?,
        content: row.get(4)?,
    })
}

/// LIKE pattern matching the case-folded `substring` literally anywhere in
/// `fold_case(content)`.
fn like_pattern(substring: &str) -> String {
    let mut pattern = String::with_capacity(substring.len() + 2);
    pattern.push('%');
    for ch in substring.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
