use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap, response::Response};
use tracing::debug;

use crate::{
    core::{app_state::AppState, http::response_envelope::ok},
    error_handler::AppResult,
    routes::{index::files_request::FilesRequest, search::search_route::request_id},
};

/// `POST /api/v1/remove`: drops index entries; the files stay on disk.
pub async fn remove_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(p): Json<FilesRequest>,
) -> AppResult<Response> {
    debug!(request_id = %request_id(&headers), files = p.files.len(), "remove_route: start");
    let report = state.sync.remove_paths(&p.files).await?;
    Ok(ok(report))
}
