//! Startup (and on-demand) reconciliation scan.
//!
//! Compares the tree under the watched root with the persisted FileRecords
//! and enqueues Created/Modified/Deleted events for every drift. Files whose
//! size and mtime match their record are not reread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sync_common::{ChangeKind, FileStat};
use tracing::{info, warn};

use crate::coordinator::walk_files;
use crate::errors::{Result, SyncError};
use crate::filter::PathFilter;
use crate::queue::EventQueue;
use crate::records::RecordStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    pub fn drift(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

pub async fn reconcile(
    root: &str,
    filter: &PathFilter,
    records: &RecordStore,
    queue: &Arc<EventQueue>,
) -> Result<ReconcileReport> {
    let root_path = PathBuf::from(root);
    if !root_path.is_dir() {
        return Err(SyncError::WatchLost(format!("{root} is not a directory")));
    }

    let walk_root = root_path.clone();
    let walk_filter = filter.clone();
    let files = tokio::task::spawn_blocking(move || {
        walk_files(&walk_root, &walk_filter)
            .into_iter()
            .filter_map(|p| match FileStat::of(std::path::Path::new(&p)) {
                Ok(stat) => Some((p, stat)),
                Err(e) => {
                    warn!(target: "index_sync::reconcile", path = %p, error = %e, "stat failed, skipping");
                    None
                }
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| SyncError::io(root, std::io::Error::other(e)))?;

    let mut report = ReconcileReport {
        scanned: files.len(),
        ..ReconcileReport::default()
    };
    let mut seen = HashSet::with_capacity(files.len());

    for (path, stat) in files {
        match records.get(&path).await {
            None => {
                queue.push_path(path.as_str(), ChangeKind::Created);
                report.created += 1;
            }
            Some(rec) if rec.stat != stat => {
                queue.push_path(path.as_str(), ChangeKind::Modified);
                report.modified += 1;
            }
            Some(_) => report.unchanged += 1,
        }
        seen.insert(path);
    }

    for rec in records.snapshot().await {
        if !seen.contains(&rec.path) {
            queue.push_path(rec.path, ChangeKind::Deleted);
            report.deleted += 1;
        }
    }

    info!(
        target: "index_sync::reconcile",
        root = %root,
        scanned = report.scanned,
        created = report.created,
        modified = report.modified,
        deleted = report.deleted,
        unchanged = report.unchanged,
        "reconciliation scan finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, write};
    use std::time::Duration;
    use sync_common::ChangeEvent;

    async fn drain(h: &Harness, queue: &Arc<EventQueue>) {
        while !queue.is_empty() {
            let lease = queue.recv().await.unwrap();
            h.coordinator.apply(lease.event()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn consistent_tree_issues_no_mutations() {
        let h = Harness::new().await;
        let a = write(h.root(), "a.txt", "alpha");
        h.apply(ChangeEvent::created(&a)).await;

        let queue = EventQueue::new();
        let report = reconcile(h.root(), h.coordinator.filter(), &h.records, &queue)
            .await
            .unwrap();
        assert_eq!(report.drift(), 0);
        assert_eq!(report.unchanged, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn restart_indexes_new_files_and_leaves_unchanged_ones() {
        let h = Harness::new().await;
        let a = write(h.root(), "a.txt", "unchanged");
        h.apply(ChangeEvent::created(&a)).await;
        let a_vector = h.index.get(&a).await.unwrap();
        let calls_before = h.embedder.calls();

        // Offline: B appears.
        let h = h.restart().await;
        let b = write(h.root(), "b.txt", "added while offline");

        let queue = EventQueue::new();
        let report = reconcile(h.root(), h.coordinator.filter(), &h.records, &queue)
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.unchanged, 1);
        drain(&h, &queue).await;

        assert_eq!(h.embedder.calls(), calls_before + 1);
        assert!(h.index.get(&b).await.is_some());
        assert_eq!(h.index.get(&a).await.unwrap(), a_vector);
    }

    #[tokio::test]
    async fn offline_deletes_and_edits_are_detected() {
        let h = Harness::new().await;
        let a = write(h.root(), "a.txt", "alpha");
        let b = write(h.root(), "b.txt", "beta");
        h.apply(ChangeEvent::created(&a)).await;
        h.apply(ChangeEvent::created(&b)).await;

        let h = h.restart().await;
        std::fs::remove_file(&a).unwrap();
        // Make sure the mtime moves even on coarse filesystems.
        tokio::time::sleep(Duration::from_millis(20)).await;
        write(h.root(), "b.txt", "beta, edited offline");

        let queue = EventQueue::new();
        let report = reconcile(h.root(), h.coordinator.filter(), &h.records, &queue)
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.modified, 1);
        drain(&h, &queue).await;

        assert!(h.index.get(&a).await.is_none());
        assert_eq!(
            h.index.get(&b).await.unwrap().0,
            h.embedder.vector_for_text("beta, edited offline")
        );
    }

    #[tokio::test]
    async fn excluded_files_are_ignored() {
        let h = Harness::new().await;
        write(h.root(), "scratch.tmp", "x");
        write(h.root(), ".hidden/a.txt", "x");

        let queue = EventQueue::new();
        let report = reconcile(h.root(), h.coordinator.filter(), &h.records, &queue)
            .await
            .unwrap();
        assert_eq!(report.scanned, 0);
    }
}
