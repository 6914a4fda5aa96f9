use axum::{extract::State, Json};
use tracing::info;

use super::{track, ApiError, AppState};
use crate::memory_db::{ExportSnapshot, ImportReport};

pub async fn export_backup(State(state): State<AppState>) -> Result<Json<ExportSnapshot>, ApiError> {
    track("export_backup", state.db.export().map(Json).map_err(ApiError::from))
}

/// The body is taken as raw text so that invalid JSON is reported in the
/// same `{error, code}` shape as every other rejected import.
pub async fn import_backup(State(state): State<AppState>, body: String) -> Result<Json<ImportReport>, ApiError> {
    let result = state.db.import_json(&body).map_err(ApiError::from);
    if let Ok(report) = &result {
        info!("Imported {} rows over HTTP", report.total_imported());
    }
    track("import_backup", result.map(Json))
}
