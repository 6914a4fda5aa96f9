//! Error taxonomy for the storage layer
//!
//! Absence is never an error here: lookups return `Option`, deletes return
//! `bool` and listings return an empty `Vec`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database file could not be opened, created or migrated.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An import snapshot was not valid JSON or lacked a required array.
    #[error("malformed import data: {0}")]
    MalformedImportData(String),

    /// A write tripped a uniqueness or foreign key constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| code.to_string()),
                )
            }
            other => StoreError::Database(other),
        }
    }
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation(_))
    }
}
