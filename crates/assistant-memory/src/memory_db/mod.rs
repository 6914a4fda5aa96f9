//! Memory database module - SQLite-based storage for sessions, messages,
//! long-term memory, and the research/document catalog
pub mod schema;
pub mod migration;
pub mod session_ledger;
pub mod conversation_store;
pub mod memory_store;
pub mod record_store;
pub mod backup;
pub use schema::*;
pub use migration::MigrationManager;
pub use session_ledger::SessionLedger;
pub use conversation_store::ConversationStore;
pub use memory_store::LongTermMemoryStore;
pub use record_store::RecordStore;
pub use backup::{ExportSnapshot, ImportReport, TableImport};
use std::path::Path;
use std::sync::Arc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};
use crate::error::{StoreError, StoreResult};
use crate::turn::PendingTurn;

pub type DbPool = Arc<Pool<SqliteConnectionManager>>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5000,
        }
    }
}

/// Handle over the shared pool. Created once at startup and passed to
/// whatever drives the assistant; every store reads and writes through it.
pub struct MemoryDatabase {
    pub sessions: SessionLedger,
    pub conversations: ConversationStore,
    pub memories: LongTermMemoryStore,
    pub records: RecordStore,
    pool: DbPool,
}

/// SQL helpers every pooled connection carries. `fold_case(text)` lowercases
/// with full Unicode rules, where the built-in `LIKE` folds only ASCII.
pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

fn unavailable(context: String, err: impl std::fmt::Display) -> StoreError {
    StoreError::StorageUnavailable(format!("{}: {}", context, err))
}

impl MemoryDatabase {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(db_path: &Path, options: &DbOptions) -> StoreResult<Self> {
        info!("Opening assistant database at: {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| unavailable(format!("cannot create {}", parent.display()), e))?;
        }

        let busy_timeout_ms = options.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(move |conn| {
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {};",
                    busy_timeout_ms
                ))?;
                register_functions(conn)
            });
        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .build(manager)
            .map_err(|e| unavailable(format!("cannot open {}", db_path.display()), e))?;

        {
            let mut conn = pool
                .get()
                .map_err(|e| unavailable(format!("cannot connect to {}", db_path.display()), e))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )
            .map_err(|e| unavailable(format!("cannot configure {}", db_path.display()), e))?;
            MigrationManager::new(&mut conn)
                .initialize_database()
                .map_err(|e| unavailable(format!("cannot migrate {}", db_path.display()), e))?;
        }

        info!("Assistant database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Private in-memory database. The pool holds exactly one connection and
    /// never recycles it, since a new connection would be an empty database.
    pub fn new_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                register_functions(conn)
            });
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| unavailable("cannot open in-memory database".to_string(), e))?;
        {
            let mut conn = pool
                .get()
                .map_err(|e| unavailable("cannot open in-memory database".to_string(), e))?;
            MigrationManager::new(&mut conn)
                .initialize_database()
                .map_err(|e| unavailable("cannot migrate in-memory database".to_string(), e))?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: DbPool) -> Self {
        Self {
            sessions: SessionLedger::new(Arc::clone(&pool)),
            conversations: ConversationStore::new(Arc::clone(&pool)),
            memories: LongTermMemoryStore::new(Arc::clone(&pool)),
            records: RecordStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub(crate) fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside one IMMEDIATE transaction: committed when `f` returns
    /// `Ok`, rolled back when it returns `Err`.
    pub fn with_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        debug!("Transaction committed");
        Ok(result)
    }

    /// Persist the user message and snapshot the session's stored cost as
    /// the baseline for this turn's delta.
    pub fn begin_turn(&self, session_id: &str, user_text: &str) -> StoreResult<PendingTurn<'_>> {
        PendingTurn::begin(self, session_id, user_text)
    }

    pub fn stats(&self) -> StoreResult<DatabaseStats> {
        let conn = self.get_conn()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}
