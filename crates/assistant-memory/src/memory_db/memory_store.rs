//! Long-term memory: (category, key) addressed facts that outlive sessions
use crate::error::StoreResult;
use crate::memory_db::schema::*;
use crate::memory_db::{DbConnection, DbPool};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

const ENTRY_COLUMNS: &str = "id, category, key, value, created_at, updated_at, session_id";

pub struct LongTermMemoryStore {
    pool: DbPool,
}

impl LongTermMemoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Upsert in one statement. An existing pair keeps its id and
    /// `created_at`; value, `updated_at` and session reference are replaced.
    /// Concurrent writers to the same pair resolve last-write-wins.
    pub fn save(
        &self,
        category: &str,
        key: &str,
        value: &str,
        session_id: Option<&str>,
    ) -> StoreResult<MemoryEntry> {
        let conn = self.get_conn()?;
        let now = format_timestamp(&Utc::now());
        let entry = conn.query_row(
            &format!(
                "INSERT INTO custom_memory (category, key, value, created_at, updated_at, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
                 ON CONFLICT(category, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at,
                     session_id = excluded.session_id
                 RETURNING {}",
                ENTRY_COLUMNS
            ),
            params![category, key, value, now, session_id],
            row_to_entry,
        )?;
        info!("Saved memory {}/{}", category, key);
        Ok(entry)
    }

    pub fn get(&self, category: &str, key: &str) -> StoreResult<Option<MemoryEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM custom_memory WHERE category = ?1 AND key = ?2", ENTRY_COLUMNS),
                params![category, key],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// All entries, or one category's, ordered by category then most
    /// recently updated first.
    pub fn list(&self, category: Option<&str>) -> StoreResult<Vec<MemoryEntry>> {
        let conn = self.get_conn()?;
        let entries = match category {
            Some(category) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM custom_memory WHERE category = ?1
                     ORDER BY category ASC, updated_at DESC, id DESC",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map([category], row_to_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM custom_memory ORDER BY category ASC, updated_at DESC, id DESC",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_entry)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(entries)
    }

    /// True if a row was removed. Deleting a missing pair is not an error.
    pub fn delete(&self, category: &str, key: &str) -> StoreResult<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM custom_memory WHERE category = ?1 AND key = ?2",
            params![category, key],
        )?;
        debug!("Delete memory {}/{}: {} row(s)", category, key, deleted);
        Ok(deleted > 0)
    }

    /// Every fact grouped under an upper-cased category header. Categories
    /// are alphabetical; within one, the most recently affirmed fact is last.
    pub fn formatted_summary(&self) -> StoreResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM custom_memory ORDER BY category ASC, updated_at ASC, id ASC",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(render_summary(&entries))
    }

    /// Summary wrapped for injection into the assistant's system prompt.
    pub fn prompt_section(&self) -> StoreResult<Option<String>> {
        let summary = self.formatted_summary()?;
        if summary.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("\n\n## What I Remember About You\n\n{}\n", summary)))
    }
}

fn render_summary(entries: &[MemoryEntry]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<&str> = None;
    for entry in entries {
        if current != Some(entry.category.as_str()) {
            lines.push(format!("{}:", entry.category.to_uppercase()));
            current = Some(entry.category.as_str());
        }
        lines.push(format!("  - {}: {}", entry.key, entry.value));
    }
    lines.join("\n")
}

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: row.get(0)?,
        category: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        updated_at: timestamp_column(row, 5)?,
        session_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::memory_db::MemoryDatabase;
    use std::time::Duration;

    fn pause() {
        std::thread::sleep(Duration::from_millis(2));
    }

    #[test]
    fn test_save_and_list_by_category() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.memories.save("business", "company_name", "Lady's Bakery", Some("session-1")).unwrap();
        db.memories.save("business", "industry", "Food & Beverage", Some("session-1")).unwrap();
        db.memories.save("preferences", "report_format", "markdown", None).unwrap();

        assert_eq!(db.memories.list(None).unwrap().len(), 3);
        assert_eq!(db.memories.list(Some("business")).unwrap().len(), 2);
        assert!(db.memories.list(Some("technical")).unwrap().is_empty());
    }

    #[test]
    fn test_same_value_twice_keeps_identity_and_created_at() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let first = db.memories.save("personal", "timezone", "UTC", None).unwrap();
        pause();
        let second = db.memories.save("personal", "timezone", "UTC", None).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(db.memories.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_overwrites_value_and_session() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.memories.save("business", "employees", "5", Some("session-1")).unwrap();
        db.memories.save("business", "employees", "10", Some("session-2")).unwrap();

        let entries = db.memories.list(Some("business")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "10");
        assert_eq!(entries[0].session_id.as_deref(), Some("session-2"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.memories.save("personal", "timezone", "UTC", None).unwrap();

        assert!(db.memories.delete("personal", "timezone").unwrap());
        assert!(!db.memories.delete("personal", "timezone").unwrap());
        assert!(db.memories.get("personal", "timezone").unwrap().is_none());
    }

    #[test]
    fn test_memory_is_not_scoped_to_session() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let a = db.sessions.create_session().unwrap();
        db.memories.save("business", "founded_year", "2020", Some(a.as_str())).unwrap();
        let _b = db.sessions.create_session().unwrap();

        let entry = db.memories.get("business", "founded_year").unwrap().unwrap();
        assert_eq!(entry.value, "2020");
        assert_eq!(entry.session_id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_summary_groups_and_keeps_recency_order() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.memories.save("preferences", "report_format", "markdown", None).unwrap();
        pause();
        db.memories.save("business", "zeta", "first", None).unwrap();
        pause();
        db.memories.save("business", "alpha", "second", None).unwrap();
        pause();
        db.memories.save("business", "zeta", "reaffirmed", None).unwrap();

        let summary = db.memories.formatted_summary().unwrap();
        assert_eq!(
            summary,
            "BUSINESS:\n  - alpha: second\n  - zeta: reaffirmed\nPREFERENCES:\n  - report_format: markdown"
        );
    }

    #[test]
    fn test_prompt_section_empty_without_memories() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        assert!(db.memories.prompt_section().unwrap().is_none());

        db.memories.save("personal", "name", "Sam", None).unwrap();
        let section = db.memories.prompt_section().unwrap().unwrap();
        assert!(section.contains("What I Remember About You"));
        assert!(section.contains("  - name: Sam"));
    }
}
