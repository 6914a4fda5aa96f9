//! Snapshot export and insert-if-absent import
//!
//! A snapshot is a JSON object carrying `exported_at`, `version` and one array
//! per table. `research`, `sessions` and `documents` are required on import;
//! `messages` and `memories` are optional so that older snapshots still load.

use crate::error::{StoreError, StoreResult};
use crate::memory_db::conversation_store::row_to_stored_message;
use crate::memory_db::memory_store::row_to_entry;
use crate::memory_db::record_store::{row_to_document, row_to_research};
use crate::memory_db::schema::*;
use crate::memory_db::session_ledger::row_to_stats;
use crate::memory_db::MemoryDatabase;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SNAPSHOT_VERSION: &str = "2.0";

const REQUIRED_TABLES: [&str; 3] = ["research", "sessions", "documents"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    pub research: Vec<ResearchRecord>,
    pub sessions: Vec<SessionStats>,
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub memories: Vec<MemoryEntry>,
}

/// Per-table outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableImport {
    pub imported: usize,
    /// Rows already present under their natural key.
    pub skipped: usize,
    /// Rows that could not be decoded or violated a constraint.
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub sessions: TableImport,
    pub messages: TableImport,
    pub research: TableImport,
    pub documents: TableImport,
    pub memories: TableImport,
}

impl ImportReport {
    pub fn total_imported(&self) -> usize {
        self.sessions.imported
            + self.messages.imported
            + self.research.imported
            + self.documents.imported
            + self.memories.imported
    }
}

/// Snapshot file on disk, as listed by [`list_exports`].
#[derive(Debug, Clone, Serialize)]
pub struct ExportFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl MemoryDatabase {
    /// Full row set of every table. All reads share one read transaction, so
    /// concurrent writers cannot leave a message without its session.
    pub fn export(&self) -> StoreResult<ExportSnapshot> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let snapshot = ExportSnapshot {
            exported_at: Utc::now(),
            version: SNAPSHOT_VERSION.to_string(),
            research: select_all(
                &tx,
                "SELECT id, query, sources, analysis, created_at, session_id FROM research ORDER BY id",
                row_to_research,
            )?,
            sessions: select_all(
                &tx,
                "SELECT id, started_at, last_active_at, total_cost_usd, message_count
                 FROM sessions ORDER BY started_at, rowid",
                row_to_stats,
            )?,
            documents: select_all(
                &tx,
                "SELECT id, filename, file_type, file_path, description, created_at, session_id
                 FROM documents ORDER BY id",
                row_to_document,
            )?,
            messages: select_all(
                &tx,
                "SELECT m.id, m.session_id, m.timestamp, m.role, m.content FROM messages m ORDER BY m.id",
                row_to_stored_message,
            )?,
            memories: select_all(
                &tx,
                "SELECT id, category, key, value, created_at, updated_at, session_id
                 FROM custom_memory ORDER BY id",
                row_to_entry,
            )?,
        };
        tx.commit()?;
        info!(
            "Exported {} sessions, {} messages, {} research, {} documents, {} memories",
            snapshot.sessions.len(),
            snapshot.messages.len(),
            snapshot.research.len(),
            snapshot.documents.len(),
            snapshot.memories.len()
        );
        Ok(snapshot)
    }

    pub fn import_json(&self, raw: &str) -> StoreResult<ImportReport> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StoreError::MalformedImportData(format!("not valid JSON: {}", e)))?;
        self.import_value(&value)
    }

    /// Merge a snapshot into the store without touching existing rows.
    ///
    /// The top-level shape is validated before anything is written. Rows are
    /// then inserted in one transaction, sessions ahead of their messages;
    /// a row that fails to decode or insert is counted and skipped.
    pub fn import_value(&self, snapshot: &Value) -> StoreResult<ImportReport> {
        let tables = SnapshotTables::parse(snapshot)?;

        let report = self.with_transaction(|tx| {
            Ok(ImportReport {
                sessions: import_rows(tx, "sessions", tables.sessions, insert_session)?,
                messages: import_rows(tx, "messages", tables.messages, insert_message)?,
                research: import_rows(tx, "research", tables.research, insert_research)?,
                documents: import_rows(tx, "documents", tables.documents, insert_document)?,
                memories: import_rows(tx, "memories", tables.memories, insert_memory)?,
            })
        })?;

        info!("Import finished: {:?}", report);
        Ok(report)
    }

    pub fn import_snapshot(&self, snapshot: &ExportSnapshot) -> StoreResult<ImportReport> {
        self.import_value(&serde_json::to_value(snapshot)?)
    }
}

struct SnapshotTables<'a> {
    sessions: &'a [Value],
    messages: &'a [Value],
    research: &'a [Value],
    documents: &'a [Value],
    memories: &'a [Value],
}

impl<'a> SnapshotTables<'a> {
    fn parse(snapshot: &'a Value) -> StoreResult<Self> {
        let object = snapshot.as_object().ok_or_else(|| {
            StoreError::MalformedImportData("expected a JSON object at the top level".to_string())
        })?;

        for table in REQUIRED_TABLES {
            match object.get(table) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(StoreError::MalformedImportData(format!("'{}' must be an array", table)))
                }
                None => {
                    return Err(StoreError::MalformedImportData(format!(
                        "missing required array '{}' (expected {})",
                        table,
                        REQUIRED_TABLES.join(", ")
                    )))
                }
            }
        }

        let table = |name: &str| -> StoreResult<&'a [Value]> {
            match object.get(name) {
                Some(Value::Array(rows)) => Ok(rows.as_slice()),
                None | Some(Value::Null) => Ok(&[]),
                Some(_) => Err(StoreError::MalformedImportData(format!("'{}' must be an array", name))),
            }
        };

        Ok(Self {
            sessions: table("sessions")?,
            messages: table("messages")?,
            research: table("research")?,
            documents: table("documents")?,
            memories: table("memories")?,
        })
    }
}

fn select_all<T>(
    conn: &Connection,
    sql: &str,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], map)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn import_rows<T, F>(conn: &Connection, table: &str, rows: &[Value], insert: F) -> StoreResult<TableImport>
where
    T: DeserializeOwned,
    F: Fn(&Connection, &T) -> StoreResult<bool>,
{
    let mut counts = TableImport::default();
    for (index, row) in rows.iter().enumerate() {
        let record = match T::deserialize(row) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping undecodable {} row {}: {}", table, index, e);
                counts.failed += 1;
                continue;
            }
        };
        match insert(conn, &record) {
            Ok(true) => counts.imported += 1,
            Ok(false) => counts.skipped += 1,
            Err(StoreError::ConstraintViolation(msg)) => {
                warn!("Skipping {} row {}: {}", table, index, msg);
                counts.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(counts)
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> StoreResult<bool> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

fn insert_session(conn: &Connection, session: &SessionStats) -> StoreResult<bool> {
    if exists(conn, "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)", [&session.id])? {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO sessions (id, started_at, last_active_at, total_cost_usd, message_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id,
            format_timestamp(&session.started_at),
            format_timestamp(&session.last_active_at),
            session.total_cost_usd,
            session.message_count,
        ],
    )?;
    Ok(true)
}

fn insert_message(conn: &Connection, message: &StoredMessage) -> StoreResult<bool> {
    let timestamp = format_timestamp(&message.timestamp);
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM messages
         WHERE session_id = ?1 AND timestamp = ?2 AND role = ?3 AND content = ?4)",
        params![message.session_id, timestamp, message.role, message.content],
    )? {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO messages (session_id, timestamp, role, content) VALUES (?1, ?2, ?3, ?4)",
        params![message.session_id, timestamp, message.role, message.content],
    )?;
    Ok(true)
}

fn insert_research(conn: &Connection, record: &ResearchRecord) -> StoreResult<bool> {
    let created_at = format_timestamp(&record.created_at);
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM research
         WHERE query = ?1 AND created_at = ?2 AND session_id IS ?3)",
        params![record.query, created_at, record.session_id],
    )? {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO research (query, sources, analysis, created_at, session_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.query,
            serde_json::to_string(&record.sources)?,
            record.analysis,
            created_at,
            record.session_id,
        ],
    )?;
    Ok(true)
}

fn insert_document(conn: &Connection, doc: &DocumentRecord) -> StoreResult<bool> {
    let created_at = format_timestamp(&doc.created_at);
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM documents
         WHERE file_path = ?1 AND created_at = ?2 AND session_id IS ?3)",
        params![doc.file_path, created_at, doc.session_id],
    )? {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO documents (filename, file_type, file_path, description, created_at, session_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![doc.filename, doc.file_type, doc.file_path, doc.description, created_at, doc.session_id],
    )?;
    Ok(true)
}

/// Existing (category, key) pairs always win over the snapshot.
fn insert_memory(conn: &Connection, entry: &MemoryEntry) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO custom_memory (category, key, value, created_at, updated_at, session_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(category, key) DO NOTHING",
        params![
            entry.category,
            entry.key,
            entry.value,
            format_timestamp(&entry.created_at),
            format_timestamp(&entry.updated_at),
            entry.session_id,
        ],
    )?;
    Ok(inserted > 0)
}

/// Write `snapshot` as pretty JSON into `dir`. Without a filename the file is
/// named `backup_YYYYmmdd_HHMMSS.json`; a given name gains `.json` if missing.
pub fn write_snapshot(snapshot: &ExportSnapshot, dir: &Path, filename: Option<&str>) -> StoreResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let filename = match filename {
        Some(name) if name.ends_with(".json") => name.to_string(),
        Some(name) => format!("{}.json", name),
        None => format!("backup_{}.json", Utc::now().format("%Y%m%d_%H%M%S")),
    };
    let path = dir.join(filename);
    std::fs::write(&path, serde_json::to_vec_pretty(snapshot)?)?;
    info!("Wrote snapshot to {}", path.display());
    Ok(path)
}

/// Load a snapshot file as untyped JSON, ready for [`MemoryDatabase::import_value`].
pub fn read_snapshot(path: &Path) -> StoreResult<Value> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        StoreError::MalformedImportData(format!("{} is not valid JSON: {}", path.display(), e))
    })
}

/// `*.json` files in `dir`, newest first. A missing directory lists as empty.
pub fn list_exports(dir: &Path) -> StoreResult<Vec<ExportFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let metadata = entry.metadata()?;
        files.push(ExportFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            size_bytes: metadata.len(),
            modified: metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn seeded(research: usize, documents: usize) -> MemoryDatabase {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let session = db.sessions.create_session().unwrap();
        db.conversations.append(&session, Role::User, "hello").unwrap();
        db.conversations.append(&session, Role::Assistant, "hi there").unwrap();
        db.sessions.record_turn(&session, 0.01, 2).unwrap();
        db.memories.save("personal", "timezone", "UTC", Some(session.as_str())).unwrap();
        for i in 0..research {
            db.records
                .save_research(&format!("query {}", i), &[format!("https://{}.example", i)], None, Some(session.as_str()))
                .unwrap();
        }
        for i in 0..documents {
            db.records
                .save_document(&NewDocument {
                    filename: format!("doc{}.md", i),
                    file_type: "md".into(),
                    file_path: format!("storage/doc{}.md", i),
                    description: None,
                    session_id: Some(session.clone()),
                })
                .unwrap();
        }
        db
    }

    #[test]
    fn test_round_trip_into_empty_store() {
        let source = seeded(3, 2);
        let snapshot = source.export().unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);

        let target = MemoryDatabase::new_in_memory().unwrap();
        let report = target.import_snapshot(&snapshot).unwrap();
        assert_eq!(report.research.imported, 3);
        assert_eq!(report.documents.imported, 2);
        assert_eq!(report.sessions.imported, 1);
        assert_eq!(report.messages.imported, 2);
        assert_eq!(report.memories.imported, 1);

        let stats = target.stats().unwrap();
        assert_eq!(stats.total_research, 3);
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_messages, 2);

        let session = &snapshot.sessions[0];
        let restored = target.sessions.get_stats(&session.id).unwrap().unwrap();
        assert_eq!(restored.message_count, 2);
        assert!((restored.total_cost_usd - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_reimport_skips_everything() {
        let db = seeded(2, 2);
        let snapshot = db.export().unwrap();
        let report = db.import_snapshot(&snapshot).unwrap();

        assert_eq!(report.total_imported(), 0);
        assert_eq!(report.research.skipped, 2);
        assert_eq!(report.documents.skipped, 2);
        assert_eq!(db.stats().unwrap().total_research, 2);
    }

    #[test]
    fn test_import_never_overwrites_memories_or_totals() {
        let db = seeded(0, 0);
        let mut snapshot = db.export().unwrap();
        snapshot.memories[0].value = "PST".into();
        snapshot.sessions[0].total_cost_usd = 99.0;

        db.import_snapshot(&snapshot).unwrap();
        assert_eq!(db.memories.get("personal", "timezone").unwrap().unwrap().value, "UTC");
        let id = &snapshot.sessions[0].id;
        assert!(db.sessions.get_stats(id).unwrap().unwrap().total_cost_usd < 1.0);
    }

    #[test]
    fn test_malformed_snapshot_leaves_store_untouched() {
        let db = MemoryDatabase::new_in_memory().unwrap();

        assert!(matches!(db.import_json("{not json"), Err(StoreError::MalformedImportData(_))));
        assert!(matches!(db.import_json("[1, 2]"), Err(StoreError::MalformedImportData(_))));

        let missing_documents = json!({
            "sessions": [{"id": "s1", "started_at": "2024-01-01T00:00:00", "last_active_at": "2024-01-01T00:00:00"}],
            "research": []
        });
        let err = db.import_value(&missing_documents).unwrap_err();
        assert!(matches!(err, StoreError::MalformedImportData(ref m) if m.contains("documents")));
        assert_eq!(db.stats().unwrap().total_sessions, 0);
    }

    #[test]
    fn test_legacy_snapshot_imports_and_counts_bad_rows() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let legacy = json!({
            "exported_at": "2024-05-01T10:00:00.000000",
            "version": "1.0",
            "research": [
                {"id": 7, "query": "flour prices", "sources": "[\"https://a.example\"]",
                 "analysis": "rising", "created_at": "2024-04-30T09:00:00.123456", "session_id": null},
                {"id": 8, "sources": "[]", "created_at": "2024-04-30T09:00:00"}
            ],
            "sessions": [],
            "documents": [
                {"id": 1, "filename": "plan.xlsx", "file_type": "xlsx", "file_path": "storage/plan.xlsx",
                 "description": null, "created_at": "2024-04-30 09:05:00", "session_id": "gone"}
            ]
        });

        let report = db.import_value(&legacy).unwrap();
        assert_eq!(report.research, TableImport { imported: 1, skipped: 0, failed: 1 });
        assert_eq!(report.documents.imported, 1);
        assert_eq!(db.records.list_research(10).unwrap()[0].sources, vec!["https://a.example"]);
    }

    #[test]
    fn test_orphan_message_is_counted_as_failed() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let snapshot = json!({
            "research": [], "sessions": [], "documents": [],
            "messages": [{"session_id": "ghost", "timestamp": "2024-01-01T00:00:00Z", "role": "user", "content": "hi"}]
        });
        let report = db.import_value(&snapshot).unwrap();
        assert_eq!(report.messages.failed, 1);
        assert_eq!(db.stats().unwrap().total_messages, 0);
    }

    #[test]
    fn test_export_during_concurrent_writes_is_consistent() {
        use crate::memory_db::DbOptions;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let db = Arc::new(MemoryDatabase::open(&dir.path().join("agent.db"), &DbOptions::default()).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let db = Arc::clone(&db);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let session = db.sessions.create_session().unwrap();
                    db.conversations.append(&session, Role::User, "question").unwrap();
                    db.conversations.append(&session, Role::Assistant, "answer").unwrap();
                }
            })
        };

        for _ in 0..20 {
            let snapshot = db.export().unwrap();
            let target = MemoryDatabase::new_in_memory().unwrap();
            let report = target.import_snapshot(&snapshot).unwrap();
            assert_eq!(report.messages.failed, 0);
            assert_eq!(report.messages.imported, snapshot.messages.len());
            assert_eq!(report.sessions.imported, snapshot.sessions.len());
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn test_snapshot_files() {
        let dir = TempDir::new().unwrap();
        let db = seeded(1, 1);
        let snapshot = db.export().unwrap();

        let named = write_snapshot(&snapshot, dir.path(), Some("weekly")).unwrap();
        assert_eq!(named.file_name().unwrap(), "weekly.json");
        let default = write_snapshot(&snapshot, dir.path(), None).unwrap();
        let name = default.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("backup_") && name.ends_with(".json"));

        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        assert_eq!(list_exports(dir.path()).unwrap().len(), 2);
        assert!(list_exports(&dir.path().join("missing")).unwrap().is_empty());

        let target = MemoryDatabase::new_in_memory().unwrap();
        let report = target.import_value(&read_snapshot(&named).unwrap()).unwrap();
        assert_eq!(report.research.imported, 1);
    }
}
