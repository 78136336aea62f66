//! Index synchronization: keeps the vector index in line with the watched tree.
//!
//! Data flow: filesystem → [`ChangeDetector`] → [`EventQueue`] →
//! [`IndexingCoordinator`] → (embedding client → vector index).
//!
//! - The queue coalesces events per path and never leases a path twice.
//! - The coordinator holds a per-path lock for the whole mutation,
//!   including the remote calls.
//! - FileRecords are persisted by [`RecordStore`]; the [`reconcile`] scan
//!   uses them to repair drift accumulated while the process was down.
//! - Losing the watch is fatal: [`SyncService::run`] returns
//!   [`SyncError::WatchLost`].

mod config;
mod coordinator;
mod detector;
mod errors;
mod filter;
mod locks;
mod queue;
mod reconcile;
mod records;
mod service;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use coordinator::{FailedPath, IndexingCoordinator, MutationOutcome, MutationReport, StatsSnapshot};
pub use detector::{ChangeDetector, DetectorSignal};
pub use errors::{Result, SyncError};
pub use filter::PathFilter;
pub use queue::{EventQueue, Lease};
pub use reconcile::{ReconcileReport, reconcile};
pub use records::{FileRecord, RecordStatus, RecordStore};
pub use sync_common::retry::{RetryPolicy, retry_with_backoff};
pub use service::{SyncHandle, SyncHealth, SyncService};
