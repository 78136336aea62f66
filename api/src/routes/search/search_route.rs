use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    response::Response,
};
use file_search::Query;
use tracing::debug;

use crate::{
    core::{app_state::AppState, http::response_envelope::ok},
    error_handler::{AppError, AppResult},
    routes::search::search_response::SearchResponse,
};

/// `POST /api/v1/search`, multipart with optional `text`, `image` and `top_n`.
pub async fn search_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let request_id = request_id(&headers);

    let mut query = Query::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => {
                let text = field.text().await?;
                query.text = Some(text).filter(|t| !t.trim().is_empty());
            }
            "image" => {
                let bytes = field.bytes().await?;
                query.image = Some(bytes.to_vec()).filter(|b| !b.is_empty());
            }
            "top_n" => {
                let raw = field.text().await?;
                query.top_n = parse_top_n(&raw)?;
            }
            other => debug!(%request_id, field = %other, "ignoring unknown multipart field"),
        }
    }

    debug!(
        %request_id,
        has_text = query.text.is_some(),
        image_bytes = query.image.as_ref().map_or(0, Vec::len),
        top_n = ?query.top_n,
        "search_route: start"
    );

    respond(&state, &query).await
}

pub(crate) async fn respond(state: &AppState, query: &Query) -> AppResult<Response> {
    let kind = query.kind()?;
    let top_n = query.top_n.unwrap_or(state.search.config().default_top_n);
    let results = state.search.search(query).await?;
    Ok(ok(SearchResponse {
        kind,
        top_n,
        results,
    }))
}

fn parse_top_n(raw: &str) -> AppResult<Option<usize>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<usize>()
        .map(Some)
        .map_err(|_| AppError::bad_field("top_n", format!("top_n must be a positive integer, got '{raw}'")))
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Request-Id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-")
        .to_string()
}
