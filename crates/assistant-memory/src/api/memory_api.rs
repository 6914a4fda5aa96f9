//! Long-term memory endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{track, ApiError, AppState};
use crate::memory_db::MemoryEntry;

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveMemoryRequest {
    pub category: String,
    pub key: String,
    pub value: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub prompt_section: Option<String>,
}

pub async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> Result<Json<Vec<MemoryEntry>>, ApiError> {
    let result = state.db.memories.list(query.category.as_deref()).map_err(ApiError::from);
    track("list_memories", result.map(Json))
}

pub async fn save_memory(
    State(state): State<AppState>,
    Json(payload): Json<SaveMemoryRequest>,
) -> Result<Json<MemoryEntry>, ApiError> {
    let result = if payload.category.trim().is_empty() || payload.key.trim().is_empty() {
        Err(ApiError::bad_request("Memory category and key cannot be empty"))
    } else {
        state
            .db
            .memories
            .save(&payload.category, &payload.key, &payload.value, payload.session_id.as_deref())
            .map_err(ApiError::from)
    };
    track("save_memory", result.map(Json))
}

/// Deleting a missing pair answers `{"deleted": false}`, not 404.
pub async fn delete_memory(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let result = state.db.memories.delete(&category, &key).map_err(ApiError::from);
    track("delete_memory", result.map(|deleted| Json(DeleteResponse { deleted })))
}

pub async fn memory_summary(State(state): State<AppState>) -> Result<Json<SummaryResponse>, ApiError> {
    let result = state
        .db
        .memories
        .formatted_summary()
        .and_then(|summary| {
            let prompt_section = state.db.memories.prompt_section()?;
            Ok(SummaryResponse { summary, prompt_section })
        })
        .map_err(ApiError::from);
    track("memory_summary", result.map(Json))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{router, send};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_list_delete_cycle() {
        let (app, _db) = router();
        let (status, saved) = send(&app, "POST", "/api/memories", Some(json!({
            "category": "personal", "key": "timezone", "value": "UTC"
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["value"], "UTC");

        let (_, listed) = send(&app, "GET", "/api/memories", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (_, deleted) = send(&app, "DELETE", "/api/memories/personal/timezone", None).await;
        assert_eq!(deleted["deleted"], true);
        let (status, again) = send(&app, "DELETE", "/api/memories/personal/timezone", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["deleted"], false);

        let (_, listed) = send(&app, "GET", "/api/memories?category=personal", None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_and_validation() {
        let (app, db) = router();
        db.memories.save("business", "company_name", "Lady's Bakery", None).unwrap();

        let (_, summary) = send(&app, "GET", "/api/memories/summary", None).await;
        assert_eq!(summary["summary"], "BUSINESS:\n  - company_name: Lady's Bakery");
        assert!(summary["prompt_section"].as_str().unwrap().contains("What I Remember"));

        let (status, _) = send(&app, "POST", "/api/memories", Some(json!({
            "category": " ", "key": "k", "value": "v"
        }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
