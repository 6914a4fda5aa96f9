use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{track, validate_session_id, ApiError, AppState};
use crate::memory_db::{SearchHit, StoredMessage};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
    /// Restrict the search to one session.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SearchResponse {
    AllSessions(Vec<SearchHit>),
    Session(Vec<StoredMessage>),
}

/// Case-insensitive substring search over user and assistant messages
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = query.limit.unwrap_or(state.cfg.search_limit);
    let result = if query.q.trim().is_empty() {
        Err(ApiError::bad_request("Query parameter 'q' cannot be empty"))
    } else {
        match &query.session_id {
            Some(session_id) => validate_session_id(session_id).and_then(|_| {
                Ok(SearchResponse::Session(
                    state.db.conversations.search_session(session_id, &query.q, limit)?,
                ))
            }),
            None => state
                .db
                .conversations
                .search_all(&query.q, limit)
                .map(SearchResponse::AllSessions)
                .map_err(ApiError::from),
        }
    };
    debug!("Search for '{}' handled", query.q);
    track("search", result.map(Json))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{router, send};
    use crate::memory_db::Role;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_search_across_and_within_sessions() {
        let (app, db) = router();
        let a = db.sessions.create_session().unwrap();
        let b = db.sessions.create_session().unwrap();
        db.conversations.append(&a, Role::User, "Invoice for March").unwrap();
        db.conversations.append(&b, Role::Assistant, "the invoice is paid").unwrap();

        let (status, hits) = send(&app, "GET", "/api/search?q=INVOICE", None).await;
        assert_eq!(status, StatusCode::OK);
        let hits = hits.as_array().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["session_id"], b.as_str());
        assert!(hits[0]["session_started_at"].is_string());

        let (_, scoped) = send(&app, "GET", &format!("/api/search?q=invoice&session_id={}", a), None).await;
        assert_eq!(scoped.as_array().unwrap().len(), 1);

        let (_, limited) = send(&app, "GET", "/api/search?q=invoice&limit=1", None).await;
        assert_eq!(limited.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let (app, _db) = router();
        let (status, body) = send(&app, "GET", "/api/search?q=%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
    }
}
