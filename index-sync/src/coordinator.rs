//! Indexing coordinator: turns change events into index mutations.
//!
//! Per path, exactly one mutation runs at a time. Queue leases give that
//! for watcher events; [`PathLocks`] extend it to manual API calls that
//! bypass the queue. The event kind is only a hint: existence is checked
//! against the filesystem when the event is consumed, so a late Created
//! for a file that is already gone becomes a removal and vice versa.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use embedding_client::{EmbedError, EmbedPayload, Embedder};
use serde::Serialize;
use sync_common::{ChangeEvent, ChangeKind, FileStat, Fingerprint, Modality, normalize_path};
use sync_common::paths::is_within;
use sync_common::retry::{RetryPolicy, retry_with_backoff};
use tracing::{debug, error, info, instrument, warn};
use vector_index::{EntryMetadata, VectorIndex};
use walkdir::WalkDir;

use crate::errors::{Result, SyncError};
use crate::filter::PathFilter;
use crate::locks::PathLocks;
use crate::queue::EventQueue;
use crate::records::{FileRecord, RecordStatus, RecordStore};

/// What a single mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Vector embedded and upserted.
    Indexed,
    /// Fingerprint equals the recorded one.
    Unchanged,
    /// `n` entries removed (more than one for a deleted directory).
    Removed(usize),
    /// Modality cannot be embedded; recorded, not indexed.
    Unsupported,
    /// Embedding service refused the payload.
    Rejected,
    /// Excluded path, directory, or nothing to do.
    Skipped,
}

#[derive(Debug, Default)]
pub struct CoordinatorStats {
    indexed: AtomicU64,
    unchanged: AtomicU64,
    removed: AtomicU64,
    unsupported: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub indexed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub unsupported: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl CoordinatorStats {
    fn record(&self, outcome: MutationOutcome) {
        let counter = match outcome {
            MutationOutcome::Indexed => &self.indexed,
            MutationOutcome::Unchanged => &self.unchanged,
            MutationOutcome::Removed(n) => {
                self.removed.fetch_add(n as u64, Ordering::Relaxed);
                return;
            }
            MutationOutcome::Unsupported => &self.unsupported,
            MutationOutcome::Rejected => &self.rejected,
            MutationOutcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            indexed: self.indexed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub path: String,
    pub error: String,
}

/// Aggregated result of a manual index/remove call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub succeeded: Vec<String>,
    pub unsupported: Vec<String>,
    pub failed: Vec<FailedPath>,
}

impl MutationReport {
    fn fail(&mut self, path: impl Into<String>, error: impl ToString) {
        self.failed.push(FailedPath {
            path: path.into(),
            error: error.to_string(),
        });
    }
}

enum PathState {
    File,
    Dir,
    Absent,
}

pub struct IndexingCoordinator {
    root: String,
    filter: PathFilter,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    records: Arc<RecordStore>,
    retry: RetryPolicy,
    locks: PathLocks,
    stats: CoordinatorStats,
}

impl IndexingCoordinator {
    pub fn new(
        root: impl Into<String>,
        filter: PathFilter,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        records: Arc<RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            root: root.into(),
            filter,
            embedder,
            index,
            records,
            retry,
            locks: PathLocks::default(),
            stats: CoordinatorStats::default(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Paths with a mutation currently running or waiting for its turn.
    pub fn in_flight(&self) -> usize {
        self.locks.in_flight()
    }

    /// Consumes the queue until it is closed.
    pub async fn run_worker(self: Arc<Self>, queue: Arc<EventQueue>, worker: usize) {
        debug!(target: "index_sync::coordinator", worker, "worker started");
        while let Some(lease) = queue.recv().await {
            let event = lease.event();
            match self.apply(event).await {
                Ok(outcome) => debug!(
                    target: "index_sync::coordinator",
                    worker,
                    path = %event.path,
                    kind = ?event.kind,
                    ?outcome,
                    "event applied"
                ),
                // Contained to this path; the next reconciliation scan picks it up again.
                Err(e) => error!(
                    target: "index_sync::coordinator",
                    worker,
                    path = %event.path,
                    kind = ?event.kind,
                    error = %e,
                    "event failed"
                ),
            }
            drop(lease);
        }
        debug!(target: "index_sync::coordinator", worker, "worker stopped");
    }

    /// Applies one change event under the path's lock.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<MutationOutcome> {
        if !self.filter.accepts(&event.path) {
            return Ok(MutationOutcome::Skipped);
        }

        let _guard = self.locks.lock(&event.path).await;
        let result = self.apply_locked(&event.path, event.kind).await;
        match &result {
            Ok(outcome) => self.stats.record(*outcome),
            Err(_) => self.stats.failure(),
        }
        result
    }

    async fn apply_locked(&self, path: &str, kind: ChangeKind) -> Result<MutationOutcome> {
        let state = path_state(path).await?;
        match (kind, state) {
            (_, PathState::Absent) => self.remove_under(path).await,
            (ChangeKind::Deleted, PathState::File) => {
                debug!(
                    target: "index_sync::coordinator",
                    path = %path,
                    "deleted path exists again, indexing"
                );
                self.index_file(path).await
            }
            (_, PathState::File) => self.index_file(path).await,
            // A file replaced by a directory leaves its record behind.
            (ChangeKind::Deleted, PathState::Dir) => match self.records.get(path).await {
                Some(_) => self.remove_one(path).await.map(|_| MutationOutcome::Removed(1)),
                None => Ok(MutationOutcome::Skipped),
            },
            (_, PathState::Dir) => Ok(MutationOutcome::Skipped),
        }
    }

    /// Embeds and upserts a regular file unless its fingerprint is already recorded.
    #[instrument(skip_all, fields(path = %path))]
    async fn index_file(&self, path: &str) -> Result<MutationOutcome> {
        let read = retry_with_backoff(&self.retry, "read", path, || read_file(path)).await;
        let (bytes, stat, fingerprint) = match read {
            Ok(v) => v,
            Err(SyncError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return self.remove_under(path).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(existing) = self.records.get(path).await {
            if existing.fingerprint == fingerprint {
                debug!(target: "index_sync::coordinator", path = %path, "fingerprint unchanged");
                return Ok(MutationOutcome::Unchanged);
            }
        }

        let modality = Modality::from_path(Path::new(path));
        let record = |status| FileRecord {
            path: path.to_string(),
            modality,
            fingerprint: fingerprint.clone(),
            stat,
            status,
            updated_at: Utc::now(),
        };

        let text;
        let payload = match modality {
            Modality::Text => {
                text = String::from_utf8_lossy(&bytes);
                EmbedPayload::Text(&text)
            }
            Modality::Image => EmbedPayload::Image(&bytes),
            Modality::Unsupported => {
                info!(
                    target: "index_sync::coordinator",
                    path = %path,
                    "unsupported modality, not indexed"
                );
                self.records.put(record(RecordStatus::Unsupported)).await?;
                return Ok(MutationOutcome::Unsupported);
            }
        };

        let embedded = retry_with_backoff(&self.retry, "embed", path, || async {
            self.embedder.embed(payload).await.map_err(SyncError::from)
        })
        .await;

        let vector = match embedded {
            Ok(v) => v,
            Err(SyncError::Embed(EmbedError::InvalidInput(reason))) => {
                warn!(
                    target: "index_sync::coordinator",
                    path = %path,
                    %reason,
                    "payload rejected by embedding service"
                );
                // The old vector describes content that no longer exists.
                self.delete_entry(path).await?;
                self.records.put(record(RecordStatus::Rejected)).await?;
                return Ok(MutationOutcome::Rejected);
            }
            Err(e) => return Err(e),
        };

        self.upsert_entry(path, vector, modality, &fingerprint).await?;
        // Only after a confirmed upsert, so a crash here means a retry rather than a stale record.
        self.records.put(record(RecordStatus::Indexed)).await?;

        info!(
            target: "index_sync::coordinator",
            path = %path,
            modality = %modality,
            fingerprint = %fingerprint,
            "indexed"
        );
        Ok(MutationOutcome::Indexed)
    }

    async fn upsert_entry(
        &self,
        path: &str,
        vector: Vec<f32>,
        modality: Modality,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        retry_with_backoff(&self.retry, "upsert", path, || {
            let metadata = EntryMetadata {
                modality,
                fingerprint: fingerprint.clone(),
                original_path: path.to_string(),
            };
            let vector = vector.clone();
            async move {
                self.index
                    .upsert(path, vector, metadata)
                    .await
                    .map_err(SyncError::from)
            }
        })
        .await
    }

    async fn delete_entry(&self, path: &str) -> Result<()> {
        retry_with_backoff(&self.retry, "delete", path, || async {
            self.index.delete(path).await.map_err(SyncError::from)
        })
        .await
    }

    /// Removes the entry and record for one path. The caller holds its lock.
    async fn remove_one(&self, path: &str) -> Result<()> {
        self.delete_entry(path).await?;
        self.records.remove(path).await?;
        info!(target: "index_sync::coordinator", path = %path, "removed");
        Ok(())
    }

    /// Removes `path` and, for a vanished directory, every record beneath it.
    /// The caller holds the lock for `path` itself.
    async fn remove_under(&self, path: &str) -> Result<MutationOutcome> {
        let mut targets = self.records.paths_under(path).await;
        if targets.is_empty() {
            // Nothing recorded; the index may still hold an entry from a lost record.
            self.delete_entry(path).await?;
            return Ok(MutationOutcome::Removed(0));
        }
        targets.sort();

        let mut removed = 0;
        for target in &targets {
            if target == path {
                self.remove_one(target).await?;
            } else {
                let _guard = self.locks.lock(target).await;
                if path_state(target).await?.is_absent() {
                    self.remove_one(target).await?;
                } else {
                    continue;
                }
            }
            removed += 1;
        }
        Ok(MutationOutcome::Removed(removed))
    }

    /// Resolves a caller-supplied path against the watched root.
    fn resolve(&self, raw: &str) -> Result<String> {
        let path = normalize_path(Path::new(raw), Path::new(&self.root));
        if !is_within(&path, &self.root) || !self.filter.accepts(&path) {
            return Err(SyncError::OutsideRoot(path));
        }
        Ok(path)
    }

    /// Synchronously indexes the given paths; directories are expanded to their files.
    pub async fn index_paths(&self, paths: &[String]) -> MutationReport {
        let mut report = MutationReport::default();
        for raw in paths {
            let path = match self.resolve(raw) {
                Ok(p) => p,
                Err(e) => {
                    report.fail(raw.as_str(), e);
                    continue;
                }
            };

            let files = match path_state(&path).await {
                Ok(PathState::File) => vec![path],
                Ok(PathState::Dir) => match self.files_under(&path).await {
                    Ok(files) => files,
                    Err(e) => {
                        report.fail(path, e);
                        continue;
                    }
                },
                Ok(PathState::Absent) => {
                    report.fail(path, "no such file");
                    continue;
                }
                Err(e) => {
                    report.fail(path, e);
                    continue;
                }
            };

            for file in files {
                match self.apply(&ChangeEvent::modified(file.as_str())).await {
                    Ok(MutationOutcome::Unsupported) => report.unsupported.push(file),
                    Ok(MutationOutcome::Rejected) => {
                        report.fail(file, "rejected by embedding service")
                    }
                    Ok(MutationOutcome::Removed(_)) => report.fail(file, "no such file"),
                    Ok(_) => report.succeeded.push(file),
                    Err(e) => report.fail(file, e),
                }
            }
        }
        info!(
            target: "index_sync::coordinator",
            succeeded = report.succeeded.len(),
            unsupported = report.unsupported.len(),
            failed = report.failed.len(),
            "manual index finished"
        );
        report
    }

    /// Synchronously removes index entries for the given paths. Files are left untouched.
    pub async fn remove_paths(&self, paths: &[String]) -> MutationReport {
        let mut report = MutationReport::default();
        for raw in paths {
            let path = match self.resolve(raw) {
                Ok(p) => p,
                Err(e) => {
                    report.fail(raw.as_str(), e);
                    continue;
                }
            };

            let result = {
                let _guard = self.locks.lock(&path).await;
                self.remove_entries(&path).await
            };
            match result {
                Ok(n) => {
                    self.stats.record(MutationOutcome::Removed(n));
                    report.succeeded.push(path);
                }
                Err(e) => {
                    self.stats.failure();
                    report.fail(path, e);
                }
            }
        }
        info!(
            target: "index_sync::coordinator",
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "manual remove finished"
        );
        report
    }

    /// Drops entries and records under `path` regardless of whether the files exist.
    async fn remove_entries(&self, path: &str) -> Result<usize> {
        let targets = self.records.paths_under(path).await;
        if targets.is_empty() {
            self.delete_entry(path).await?;
            return Ok(0);
        }
        for target in &targets {
            if target == path {
                self.remove_one(target).await?;
            } else {
                let _guard = self.locks.lock(target).await;
                self.remove_one(target).await?;
            }
        }
        Ok(targets.len())
    }

    async fn files_under(&self, dir: &str) -> Result<Vec<String>> {
        let dir_owned = PathBuf::from(dir);
        let filter = self.filter.clone();
        tokio::task::spawn_blocking(move || walk_files(&dir_owned, &filter))
            .await
            .map_err(|e| SyncError::io(dir, std::io::Error::other(e)))
    }
}

impl PathState {
    fn is_absent(&self) -> bool {
        matches!(self, PathState::Absent)
    }
}

async fn path_state(path: &str) -> Result<PathState> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(PathState::Dir),
        Ok(_) => Ok(PathState::File),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PathState::Absent),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

async fn read_file(path: &str) -> Result<(Vec<u8>, FileStat, Fingerprint)> {
    let owned = PathBuf::from(path);
    tokio::task::spawn_blocking(move || sync_common::read_with_fingerprint(&owned))
        .await
        .map_err(|e| SyncError::io(path, std::io::Error::other(e)))?
        .map_err(|e| SyncError::io(path, e))
}

/// Regular files under `dir` that pass the filter, as normalized paths.
pub(crate) fn walk_files(dir: &Path, filter: &PathFilter) -> Vec<String> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(target: "index_sync::walk", error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| normalize_path(e.path(), dir))
        .filter(|p| filter.accepts(p))
        .collect()
}
