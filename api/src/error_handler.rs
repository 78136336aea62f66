use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use file_search::SearchError;
use index_sync::SyncError;
use thiserror::Error;

use crate::core::http::response_envelope::{ApiErrorDetail, ApiResponse};

/// Public application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // --- IO / server ---
    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request ---
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        field: Option<&'static str>,
    },

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            field: None,
        }
    }

    pub fn bad_field(field: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            field: Some(field),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Bind(_) | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Search(SearchError::InvalidQuery(_)) => StatusCode::BAD_REQUEST,
            AppError::Search(SearchError::SearchFailed(_)) => StatusCode::BAD_GATEWAY,
            AppError::Sync(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            AppError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Bind(_) => "BIND_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
            AppError::BadRequest { .. } => "BAD_REQUEST",
            AppError::Search(SearchError::InvalidQuery(_)) => "INVALID_QUERY",
            AppError::Search(SearchError::SearchFailed(_)) => "SEARCH_FAILED",
            AppError::Sync(SyncError::BatchTooLarge { .. }) => "BATCH_TOO_LARGE",
            AppError::Sync(SyncError::OutsideRoot(_)) => "OUTSIDE_WATCH_ROOT",
            AppError::Sync(_) => "SYNC_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            AppError::BadRequest {
                field: Some(field), ..
            } => vec![ApiErrorDetail {
                path: Some((*field).to_string()),
                hint: None,
            }],
            _ => Vec::new(),
        };
        ApiResponse::<()>::error(self.error_code(), self.to_string(), details)
            .into_response_with_status(status)
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::bad_request(format!("malformed multipart body: {}", err.body_text()))
    }
}
