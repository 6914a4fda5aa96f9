use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::{Once, OnceLock};
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static SESSIONS_CREATED: OnceLock<IntCounter> = OnceLock::new();
static TURNS_RECORDED: OnceLock<IntCounter> = OnceLock::new();

static INIT: Once = Once::new();

/// Register the counters once per process.
pub fn init_metrics() {
    INIT.call_once(|| {
        if let Err(e) = register_counters() {
            warn!("Failed to register metrics: {}", e);
        }
    });
}

fn register_counters() -> prometheus::Result<()> {
    let req_counter = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    )?;
    let sessions_created = IntCounter::new("sessions_created_total", "Sessions created")?;
    let turns_recorded = IntCounter::new("turns_recorded_total", "Turns recorded against the ledger")?;

    REGISTRY.register(Box::new(req_counter.clone()))?;
    REGISTRY.register(Box::new(sessions_created.clone()))?;
    REGISTRY.register(Box::new(turns_recorded.clone()))?;

    let _ = REQ_COUNTER.set(req_counter);
    let _ = SESSIONS_CREATED.set(sessions_created);
    let _ = TURNS_RECORDED.set(turns_recorded);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_sessions_created() {
    if let Some(counter) = SESSIONS_CREATED.get() {
        counter.inc();
    }
}

pub fn inc_turns_recorded() {
    if let Some(counter) = TURNS_RECORDED.get() {
        counter.inc();
    }
}

pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_after_init() {
        init_metrics();
        init_metrics();
        inc_request("/api/sessions", "200");
        inc_sessions_created();

        let text = render();
        assert!(text.contains("requests_total"));
        assert!(text.contains("sessions_created_total"));
    }
}
