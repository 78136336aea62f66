use std::sync::Arc;

use axum::{extract::State, response::Response};
use chrono::{DateTime, Utc};
use index_sync::SyncHealth;
use serde::Serialize;

use crate::core::{app_state::AppState, http::response_envelope::ok};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub sync: SyncHealth,
}

/// `GET /health`: liveness plus coordinator counters and queue depth.
pub async fn health_route(State(state): State<Arc<AppState>>) -> Response {
    let sync = state.sync.health().await;
    ok(HealthResponse {
        status: "ok",
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        sync,
    })
}
