//! Types shared by every stage of the sync and search pipeline.
//!
//! - [`Modality`] is decided once per file and carried through the pipeline.
//! - [`Fingerprint`] / [`FileStat`] detect content drift.
//! - [`ChangeEvent`] is the queue message between detector and coordinator.
//! - [`point_id`] maps a normalized path to the vector store id.
//! - [`retry_with_backoff`] retries transient remote failures.

pub mod env;
pub mod event;
pub mod fingerprint;
pub mod modality;
pub mod paths;
pub mod point_id;
pub mod retry;

pub use env::{ConfigError, EnvLookup, ProcessEnv};
pub use event::{ChangeEvent, ChangeKind};
pub use fingerprint::{FileStat, Fingerprint, fingerprint_bytes, read_with_fingerprint};
pub use modality::Modality;
pub use paths::normalize_path;
pub use point_id::point_id;
pub use retry::{RetryPolicy, Retryable, retry_with_backoff};
