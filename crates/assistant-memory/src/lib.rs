//! Session memory and cost accounting for a personal assistant agent.
//!
//! [`MemoryDatabase`] is the single handle over the SQLite store. It exposes
//! the session ledger, the per-session conversation log, long-term memory,
//! the research/document catalog and snapshot backup. Turn recording lives in
//! [`turn`]; read-side history helpers in [`history`].

pub mod config;
pub mod error;
pub mod history;
pub mod memory_db;
pub mod telemetry;
pub mod turn;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod metrics;
#[cfg(feature = "cli")]
pub mod server;

pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use memory_db::{
    DbOptions, ExportSnapshot, ImportReport, LongTermMemoryStore, MemoryDatabase, MemoryEntry, Role,
    SessionStats, StoredMessage,
};
pub use turn::{ConversationEntry, CostDelta, PendingTurn, ToolEnvelope, TurnRecord};

#[cfg(feature = "cli")]
pub use server::run_server;
