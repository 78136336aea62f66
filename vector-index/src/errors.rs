//! Unified error types for the crate.

use std::time::Duration;

use sync_common::{ConfigError, Retryable};
use thiserror::Error;

/// Failure of a vector index operation.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Connectivity loss or server-side failure.
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its deadline.
    #[error("vector index call timed out after {0:?}")]
    Timeout(Duration),

    /// Vector or collection size differs from the configured dimension.
    #[error("vector size mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    /// Invalid or unsupported configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IndexError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_) | IndexError::Timeout(_))
    }
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        IndexError::is_retryable(self)
    }
}
