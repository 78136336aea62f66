//! Unified error handling for `embedding-client`.
//!
//! All messages include the suffix `[Embedding Client]` to simplify
//! attribution in logs.

use std::time::Duration;

use reqwest::StatusCode;
use sync_common::{ConfigError, Retryable};
use thiserror::Error;

/// Messages the embedding service sends with a 500 when the image bytes cannot
/// be decoded. Retrying those can never succeed.
const IMAGE_DECODE_MARKERS: [&str; 3] = [
    "cannot identify image",
    "image file is truncated",
    "broken data stream",
];

/// Result alias for the whole crate.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Failure of an embedding call.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Payload cannot be interpreted for its modality (e.g. corrupt image bytes).
    #[error("[Embedding Client] invalid input: {0}")]
    InvalidInput(String),

    /// Remote embedding function unreachable or failing.
    #[error("[Embedding Client] service unavailable: {0}")]
    Unavailable(String),

    /// Deadline elapsed before a response arrived.
    #[error("[Embedding Client] timed out after {0:?}")]
    Timeout(Duration),

    /// The model returned vectors of a different size than configured.
    #[error("[Embedding Client] embedding dimension {got} != configured {want}")]
    DimensionMismatch { got: usize, want: usize },

    /// Client could not be configured.
    #[error("[Embedding Client] {0}")]
    Config(#[from] ConfigError),
}

impl EmbedError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Unavailable(_) | EmbedError::Timeout(_))
    }

    /// Maps a non-success HTTP status of the embedding service.
    pub fn from_status(status: StatusCode, url: &str, snippet: &str, timeout: Duration) -> Self {
        match status.as_u16() {
            400 | 413 | 415 | 422 => {
                EmbedError::InvalidInput(format!("HTTP {status} from {url}: {snippet}"))
            }
            408 | 504 => EmbedError::Timeout(timeout),
            500 if IMAGE_DECODE_MARKERS.iter().any(|m| snippet.contains(m)) => {
                EmbedError::InvalidInput(format!("HTTP {status} from {url}: {snippet}"))
            }
            _ => EmbedError::Unavailable(format!("HTTP {status} from {url}: {snippet}")),
        }
    }

    /// Maps a transport-level failure.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return EmbedError::Timeout(timeout);
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, "<unknown>", "", timeout);
        }
        EmbedError::Unavailable(err.to_string())
    }
}

impl Retryable for EmbedError {
    fn is_retryable(&self) -> bool {
        EmbedError::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let t = Duration::from_secs(1);
        assert!(matches!(
            EmbedError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "u", "bad image", t),
            EmbedError::InvalidInput(_)
        ));
        assert!(matches!(
            EmbedError::from_status(StatusCode::GATEWAY_TIMEOUT, "u", "", t),
            EmbedError::Timeout(_)
        ));
        let e = EmbedError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "u", "boom", t);
        assert!(matches!(e, EmbedError::Unavailable(_)));
        assert!(e.is_retryable());
        assert!(!EmbedError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn undecodable_image_is_invalid_input_despite_500() {
        let t = Duration::from_secs(1);
        let body = r#"{"detail":"Processing failed with exception: cannot identify image file <_io.BytesIO object at 0x7f>"}"#;
        let e = EmbedError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "u", body, t);
        assert!(matches!(e, EmbedError::InvalidInput(_)));
        assert!(!e.is_retryable());
    }
}
