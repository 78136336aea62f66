//! Unified error handling for `index-sync`.

use std::io;

use embedding_client::EmbedError;
use sync_common::{ConfigError, Retryable};
use thiserror::Error;
use vector_index::IndexError;

/// Result alias for the whole crate.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Filesystem access failed for one path.
    #[error("[Index Sync] I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("[Index Sync] {0}")]
    Embed(#[from] EmbedError),

    #[error("[Index Sync] {0}")]
    Index(#[from] IndexError),

    /// Persisted FileRecord state could not be read or written.
    #[error("[Index Sync] record store: {0}")]
    Records(String),

    /// The path is not under the watched root.
    #[error("[Index Sync] path outside watched root: {0}")]
    OutsideRoot(String),

    /// A manual request names more paths than allowed.
    #[error("[Index Sync] too many paths in one request: {got} > {max}")]
    BatchTooLarge { got: usize, max: usize },

    /// The filesystem watch is gone. Fatal for the process.
    #[error("[Index Sync] watch lost: {0}")]
    WatchLost(String),

    #[error("[Index Sync] {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient failures worth another attempt.
    ///
    /// `WouldBlock` is what fingerprinting reports for a file that changed
    /// while being read.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Embed(e) => e.is_retryable(),
            SyncError::Index(e) => e.is_retryable(),
            SyncError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Caused by the caller's request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::BatchTooLarge { .. } | SyncError::OutsideRoot(_))
    }

    /// True when the process cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::WatchLost(_)
                | SyncError::Config(_)
                | SyncError::Embed(EmbedError::DimensionMismatch { .. })
                | SyncError::Index(IndexError::DimensionMismatch { .. })
        )
    }
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        SyncError::is_retryable(self)
    }
}
