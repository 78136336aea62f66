use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap, response::Response};
use tracing::{debug, warn};

use crate::{
    core::{app_state::AppState, http::response_envelope::ok},
    error_handler::AppResult,
    routes::{index::files_request::FilesRequest, search::search_route::request_id},
};

/// `POST /api/v1/index`: indexes the listed files now and reports per path.
pub async fn index_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(p): Json<FilesRequest>,
) -> AppResult<Response> {
    let request_id = request_id(&headers);
    debug!(%request_id, files = p.files.len(), "index_route: start");

    let report = state.sync.index_paths(&p.files).await?;
    if !report.failed.is_empty() {
        warn!(%request_id, failed = report.failed.len(), "index_route: some paths failed");
    }
    Ok(ok(report))
}
