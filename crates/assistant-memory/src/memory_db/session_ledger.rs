//! Session identity and running cost/message totals
use crate::error::StoreResult;
use crate::memory_db::schema::*;
use crate::memory_db::{DbConnection, DbPool};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

const STATS_COLUMNS: &str = "id, started_at, last_active_at, total_cost_usd, message_count";

pub struct SessionLedger {
    pool: DbPool,
}

impl SessionLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Allocate a fresh UUID session with zeroed totals.
    pub fn create_session(&self) -> StoreResult<String> {
        let session_id = Uuid::new_v4().to_string();
        self.create_session_with_id(&session_id)?;
        Ok(session_id)
    }

    /// Register a session under a caller-chosen id (e.g. one handed out by the
    /// agent runtime).
    pub fn create_session_with_id(&self, session_id: &str) -> StoreResult<SessionStats> {
        let now = Utc::now();
        let conn = self.get_conn()?;
        Self::insert_session_with_conn(&conn, session_id, &now)?;
        info!("Created session with ID: {}", session_id);
        Ok(SessionStats {
            id: session_id.to_string(),
            started_at: now,
            last_active_at: now,
            total_cost_usd: 0.0,
            message_count: 0,
        })
    }

    pub(crate) fn insert_session_with_conn(
        conn: &Connection,
        session_id: &str,
        now: &DateTime<Utc>,
    ) -> StoreResult<()> {
        let ts = format_timestamp(now);
        conn.execute(
            "INSERT INTO sessions (id, started_at, last_active_at, total_cost_usd, message_count)
             VALUES (?1, ?2, ?3, 0.0, 0)",
            params![session_id, ts, ts],
        )?;
        Ok(())
    }

    /// Most recently active session, if any exist.
    pub fn resolve_last_session(&self) -> StoreResult<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM sessions ORDER BY last_active_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Add `cost_delta` and `message_delta` to the session's totals and touch
    /// `last_active_at`. Single UPDATE, so concurrent callers never lose an
    /// increment. Returns false when the session does not exist.
    ///
    /// The ledger is purely additive and does not police the sign of
    /// `cost_delta`; see [`crate::turn::CostDelta`] for the caller side.
    pub fn record_turn(&self, session_id: &str, cost_delta: f64, message_delta: i64) -> StoreResult<bool> {
        let conn = self.get_conn()?;
        Self::record_turn_with_conn(&conn, session_id, cost_delta, message_delta)
    }

    pub(crate) fn record_turn_with_conn(
        conn: &Connection,
        session_id: &str,
        cost_delta: f64,
        message_delta: i64,
    ) -> StoreResult<bool> {
        let now = format_timestamp(&Utc::now());
        let updated = conn.execute(
            "UPDATE sessions
             SET last_active_at = ?1,
                 total_cost_usd = total_cost_usd + ?2,
                 message_count = message_count + ?3
             WHERE id = ?4",
            params![now, cost_delta, message_delta, session_id],
        )?;
        debug!(
            "Recorded turn for session {}: cost +{:.6}, messages +{}",
            session_id, cost_delta, message_delta
        );
        Ok(updated > 0)
    }

    pub fn get_stats(&self, session_id: &str) -> StoreResult<Option<SessionStats>> {
        let conn = self.get_conn()?;
        Self::get_stats_with_conn(&conn, session_id)
    }

    pub(crate) fn get_stats_with_conn(conn: &Connection, session_id: &str) -> StoreResult<Option<SessionStats>> {
        let stats = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", STATS_COLUMNS),
                [session_id],
                row_to_stats,
            )
            .optional()?;
        Ok(stats)
    }

    /// Most recently active first.
    pub fn list_sessions(&self, limit: usize) -> StoreResult<Vec<SessionStats>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY last_active_at DESC, rowid DESC LIMIT ?1",
            STATS_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([limit as i64], row_to_stats)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}

pub(crate) fn row_to_stats(row: &Row<'_>) -> rusqlite::Result<SessionStats> {
    Ok(SessionStats {
        id: row.get(0)?,
        started_at: timestamp_column(row, 1)?,
        last_active_at: timestamp_column(row, 2)?,
        total_cost_usd: row.get(3)?,
        message_count: row.get(4)?,
    })
}
