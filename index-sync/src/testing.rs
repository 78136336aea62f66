//! Fakes and fixtures shared by this crate's tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use embedding_client::{EmbedError, EmbedPayload, Embedder};
use futures::FutureExt;
use futures::future::BoxFuture;
use sync_common::{ChangeEvent, normalize_path};
use tempfile::TempDir;
use vector_index::MemoryIndex;

use crate::coordinator::{IndexingCoordinator, MutationOutcome};
use crate::filter::PathFilter;
use crate::records::RecordStore;
use sync_common::RetryPolicy;

pub(crate) const DIM: usize = 8;

/// Deterministic embedder with switchable failure modes.
#[derive(Default)]
pub(crate) struct FakeEmbedder {
    delay: Duration,
    calls: AtomicUsize,
    fail_remaining: AtomicUsize,
    reject_images: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeEmbedder {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// The next `n` calls fail with `Unavailable`.
    pub(crate) fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub(crate) fn reject_images(&self) {
        self.reject_images.store(true, Ordering::SeqCst);
    }

    pub(crate) fn vector_for_text(&self, text: &str) -> Vec<f32> {
        vector_for_bytes(text.as_bytes())
    }
}

fn vector_for_bytes(bytes: &[u8]) -> Vec<f32> {
    let mut v = vec![0.1f32; DIM];
    for (i, b) in bytes.iter().enumerate() {
        v[i % DIM] += f32::from(*b) * (i + 1) as f32;
    }
    v
}

impl Embedder for FakeEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed<'a>(
        &'a self,
        payload: EmbedPayload<'a>,
    ) -> BoxFuture<'a, embedding_client::Result<Vec<f32>>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let failing = self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(EmbedError::Unavailable("fake outage".into()));
            }

            match payload {
                EmbedPayload::Text(t) => Ok(vector_for_bytes(t.as_bytes())),
                EmbedPayload::Image(_) if self.reject_images.load(Ordering::SeqCst) => {
                    Err(EmbedError::InvalidInput("cannot decode image".into()))
                }
                EmbedPayload::Image(bytes) => Ok(vector_for_bytes(bytes)),
            }
        }
        .boxed()
    }
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

/// Writes `contents` under `root` and returns the normalized absolute path.
pub(crate) fn write(root: &str, rel: &str, contents: &str) -> String {
    let path = Path::new(root).join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    normalize_path(&path, Path::new(root))
}

/// A coordinator over a temp directory with fake remote collaborators.
pub(crate) struct Harness {
    data: TempDir,
    state: TempDir,
    root: String,
    pub(crate) embedder: Arc<FakeEmbedder>,
    pub(crate) index: Arc<MemoryIndex>,
    pub(crate) records: Arc<RecordStore>,
    pub(crate) coordinator: Arc<IndexingCoordinator>,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::with_delay(Duration::ZERO).await
    }

    pub(crate) async fn with_delay(delay: Duration) -> Self {
        let data = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let embedder = Arc::new(FakeEmbedder {
            delay,
            ..FakeEmbedder::default()
        });
        let index = Arc::new(MemoryIndex::new(DIM));
        Self::assemble(data, state, embedder, index).await
    }

    async fn assemble(
        data: TempDir,
        state: TempDir,
        embedder: Arc<FakeEmbedder>,
        index: Arc<MemoryIndex>,
    ) -> Self {
        let root = normalize_path(data.path(), Path::new("/"));
        let records = Arc::new(
            RecordStore::open(state.path().join("records.json"))
                .await
                .unwrap(),
        );
        let filter = PathFilter::new(Path::new(&root), &["**/*.tmp".to_string()]).unwrap();
        let coordinator = Arc::new(IndexingCoordinator::new(
            root.clone(),
            filter,
            embedder.clone(),
            index.clone(),
            records.clone(),
            fast_retry(),
        ));
        Self {
            data,
            state,
            root,
            embedder,
            index,
            records,
            coordinator,
        }
    }

    /// Simulates a process restart: same files, index and state file; fresh in-memory state.
    pub(crate) async fn restart(self) -> Self {
        let Harness {
            data,
            state,
            embedder,
            index,
            ..
        } = self;
        Self::assemble(data, state, embedder, index).await
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) async fn apply(&self, event: ChangeEvent) -> MutationOutcome {
        self.coordinator.apply(&event).await.unwrap()
    }
}
