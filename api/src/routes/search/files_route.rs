use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use tracing::debug;

use crate::{
    core::app_state::AppState,
    error_handler::AppResult,
    routes::search::{
        search_request::FilesQuery,
        search_route::{request_id, respond},
    },
};

/// `GET /api/v1/files?query=...&top_n=...`: text-only search.
pub async fn files_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(p): Query<FilesQuery>,
) -> AppResult<Response> {
    debug!(request_id = %request_id(&headers), query = %p.query, "files_route: start");

    let mut query = file_search::Query::text(p.query);
    query.top_n = p.top_n;
    respond(&state, &query).await
}
