//! Rewrites axum's plain-text extractor rejections into the JSON envelope.

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::core::http::response_envelope::{ApiErrorDetail, ApiResponse};

const REQUEST_ID: &str = "X-Request-Id";

/// Request fields worth pointing at in a rejection message.
const KNOWN_FIELDS: [&str; 5] = ["files", "query", "top_n", "text", "image"];

async fn take_body(res: Response) -> (axum::http::response::Parts, Bytes) {
    let (parts, body) = res.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    (parts, bytes)
}

fn guess_field(msg: &str) -> Option<&'static str> {
    KNOWN_FIELDS.into_iter().find(|key| msg.contains(key))
}

fn hint_for(msg: &str) -> Option<&'static str> {
    if msg.contains("expected a sequence") {
        Some("Expected an array of paths, e.g. {\"files\": [\"/data/a.txt\"]}.")
    } else if msg.contains("invalid digit") || msg.contains("top_n") {
        Some("top_n must be a positive integer.")
    } else if msg.contains("Content-Type") {
        Some("Send application/json, or multipart/form-data for /api/v1/search.")
    } else {
        None
    }
}

fn ensure_request_id(parts: &mut axum::http::response::Parts) -> String {
    if let Some(v) = parts
        .headers
        .get(REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        return v.to_string();
    }
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
    let id = format!("req-{nanos}");
    if let Ok(value) = HeaderValue::from_str(&id) {
        parts.headers.insert(REQUEST_ID, value);
    }
    id
}

/// Maps 400/413/415/422 responses that are not JSON yet.
pub async fn json_error_mapper(req: Request<Body>, next: Next) -> Response {
    let res = next.run(req).await;
    let status = res.status();

    let code = match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::PAYLOAD_TOO_LARGE => "PAYLOAD_TOO_LARGE",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "UNSUPPORTED_MEDIA_TYPE",
        StatusCode::UNPROCESSABLE_ENTITY => "UNPROCESSABLE_ENTITY",
        _ => return res,
    };
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return res;
    }

    let (mut parts, bytes) = take_body(res).await;
    let original = String::from_utf8_lossy(&bytes);
    let request_id = ensure_request_id(&mut parts);
    tracing::debug!(target: "api", %request_id, %status, "mapping rejection to envelope");

    let details = match (guess_field(&original), hint_for(&original)) {
        (None, None) => Vec::new(),
        (path, hint) => vec![ApiErrorDetail {
            path: path.map(str::to_string),
            hint: hint.map(str::to_string),
        }],
    };
    let envelope = ApiResponse::<()>::error(code, original.trim(), details);

    let body = match serde_json::to_vec(&envelope) {
        Ok(v) => v,
        Err(_) => bytes.to_vec(),
    };
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(body))
}
