use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Response};
use serde::Serialize;
use tracing::info;

use crate::{
    core::{app_state::AppState, http::response_envelope::ApiResponse},
    error_handler::AppResult,
};

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub message: &'static str,
}

/// `POST /api/v1/discovery`: queues a full reconciliation scan and returns at once.
pub async fn discovery_route(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    state.sync.request_rescan()?;
    info!(target: "api", "reconciliation scan requested");
    Ok(ApiResponse::success(DiscoveryResponse {
        message: "reconciliation scan scheduled",
    })
    .into_response_with_status(StatusCode::ACCEPTED))
}
