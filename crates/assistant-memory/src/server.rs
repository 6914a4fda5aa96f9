//! HTTP server bootstrap
//!
//! One [`MemoryDatabase`] is opened at startup and shared by every handler
//! through [`AppState`]. Failing to open it is fatal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::api::{backup_api, memory_api, search_api, sessions_api, AppState};
use crate::config::Config;
use crate::memory_db::MemoryDatabase;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics();
    cfg.print_config();

    let db = MemoryDatabase::open(&cfg.db_path, &cfg.db_options())
        .with_context(|| format!("Cannot start without storage at {}", cfg.db_path.display()))?;
    info!("Memory database initialized at: {}", cfg.db_path.display());

    let addr = cfg.api_addr()?;
    let app = build_router(AppState::new(Arc::new(db), cfg));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions", get(sessions_api::list_sessions).post(sessions_api::create_session))
        .route("/api/sessions/last", get(sessions_api::last_session))
        .route("/api/sessions/:id", get(sessions_api::get_session))
        .route(
            "/api/sessions/:id/messages",
            get(sessions_api::get_messages).post(sessions_api::append_message),
        )
        .route("/api/sessions/:id/turns", post(sessions_api::record_turn))
        .route("/api/search", get(search_api::search))
        .route("/api/memories", get(memory_api::list_memories).post(memory_api::save_memory))
        .route("/api/memories/summary", get(memory_api::memory_summary))
        .route("/api/memories/:category/:key", delete(memory_api::delete_memory))
        .route("/api/backup", get(backup_api::export_backup).post(backup_api::import_backup))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .with_state(state)
}
