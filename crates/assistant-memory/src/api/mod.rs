//! HTTP handlers over the shared [`MemoryDatabase`] handle

pub mod backup_api;
pub mod memory_api;
pub mod search_api;
pub mod sessions_api;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::config::Config;
use crate::error::StoreError;
use crate::memory_db::MemoryDatabase;
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<MemoryDatabase>,
    pub cfg: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<MemoryDatabase>, cfg: Config) -> Self {
        Self { db, cfg: Arc::new(cfg) }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "code": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MalformedImportData(msg) => ApiError::bad_request(msg),
            StoreError::ConstraintViolation(msg) => ApiError {
                status: StatusCode::CONFLICT,
                message: msg,
            },
            other => {
                error!("Storage error: {}", other);
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: format!("Database error: {}", other),
                }
            }
        }
    }
}

/// Count the request under `route` with an `ok` / `error` status label.
pub(crate) fn track<T>(route: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    metrics::inc_request(route, if result.is_ok() { "ok" } else { "error" });
    result
}

pub(crate) fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.is_empty() {
        return Err(ApiError::bad_request("Session ID cannot be empty"));
    }
    if session_id.len() > 256 {
        return Err(ApiError::bad_request("Session ID too long (max 256 chars)"));
    }
    if !session_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::bad_request("Session ID contains invalid characters"));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("b6f0c5d2-1a2b-4c3d-9e8f-001122334455").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id(&"a".repeat(257)).is_err());
    }

    #[test]
    fn test_store_errors_map_to_status() {
        let bad: ApiError = StoreError::MalformedImportData("missing 'research'".into()).into();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        let conflict: ApiError = StoreError::ConstraintViolation("FOREIGN KEY".into()).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        let internal: ApiError = StoreError::StorageUnavailable("disk".into()).into();
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
