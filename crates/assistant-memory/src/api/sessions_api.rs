//! Session ledger and conversation log endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{track, validate_session_id, ApiError, AppState};
use crate::history::{conversation_stats, ConversationStats};
use crate::memory_db::{MemoryDatabase, Role, SessionStats, StoredMessage};
use crate::metrics;
use crate::turn::{ToolEnvelope, TurnRecord};

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Caller-chosen id; a UUID is allocated when absent.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub conversation: ConversationStats,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordTurnRequest {
    pub user_text: String,
    #[serde(default)]
    pub tool_events: Vec<ToolEnvelope>,
    #[serde(default)]
    pub assistant_text: String,
    pub reported_cumulative_cost: Option<f64>,
}

fn require_session(db: &MemoryDatabase, session_id: &str) -> Result<SessionStats, ApiError> {
    validate_session_id(session_id)?;
    db.sessions
        .get_stats(session_id)?
        .ok_or_else(|| ApiError::not_found(format!("Session {} not found", session_id)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SessionStats>>, ApiError> {
    let limit = query.limit.unwrap_or(state.cfg.history_limit);
    track("list_sessions", state.db.sessions.list_sessions(limit).map(Json).map_err(ApiError::from))
}

pub async fn create_session(
    State(state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionStats>), ApiError> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let session_id = request
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let result = validate_session_id(&session_id)
        .and_then(|_| Ok(state.db.sessions.create_session_with_id(&session_id)?));
    let stats = track("create_session", result)?;
    metrics::inc_sessions_created();
    info!("Session {} created over HTTP", stats.id);
    Ok((StatusCode::CREATED, Json(stats)))
}

/// Most recently active session, or `null` when none exist.
pub async fn last_session(State(state): State<AppState>) -> Result<Json<Option<SessionStats>>, ApiError> {
    track("last_session", resolve_last(&state.db).map(Json))
}

fn resolve_last(db: &MemoryDatabase) -> Result<Option<SessionStats>, ApiError> {
    let Some(id) = db.sessions.resolve_last_session()? else {
        return Ok(None);
    };
    Ok(db.sessions.get_stats(&id)?)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let result = require_session(&state.db, &session_id).and_then(|stats| {
        let messages = state.db.conversations.read(&session_id, crate::history::FULL_HISTORY_LIMIT)?;
        Ok(SessionDetail { stats, conversation: conversation_stats(&messages) })
    });
    track("get_session", result.map(Json))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let limit = query.limit.unwrap_or(state.cfg.history_limit);
    let result = require_session(&state.db, &session_id)
        .and_then(|_| Ok(state.db.conversations.read(&session_id, limit)?));
    track("get_messages", result.map(Json))
}

/// Raw append; does not touch the ledger totals.
pub async fn append_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<(StatusCode, Json<StoredMessage>), ApiError> {
    let result = require_session(&state.db, &session_id).and_then(|_| {
        Ok(state.db.conversations.append(&session_id, payload.role, &payload.content)?)
    });
    track("append_message", result).map(|message| (StatusCode::CREATED, Json(message)))
}

pub async fn record_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<RecordTurnRequest>,
) -> Result<Json<TurnRecord>, ApiError> {
    let result = require_session(&state.db, &session_id).and_then(|_| {
        let mut turn = state.db.begin_turn(&session_id, &payload.user_text)?;
        for envelope in payload.tool_events {
            turn.tool_event(envelope);
        }
        Ok(turn.complete(&payload.assistant_text, payload.reported_cumulative_cost)?)
    });
    let record = track("record_turn", result)?;
    metrics::inc_turns_recorded();
    Ok(Json(record))
}
