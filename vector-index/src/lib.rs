//! Vector index client: the only owner of IndexEntries.
//!
//! The design is flat and splits responsibilities into focused modules:
//! - [`VectorIndex`] is the seam used by the coordinator and the search path.
//! - [`QdrantIndex`] talks to a remote Qdrant collection.
//! - [`MemoryIndex`] is a brute-force cosine backend for tests and local runs.
//!
//! Ids are normalized file paths; deleting an absent id succeeds; a
//! successful upsert is visible to every search issued after it returns.

mod config;
mod errors;
mod memory;
mod qdrant_facade;

pub use config::{IndexBackend, IndexConfig};
pub use errors::IndexError;
pub use memory::MemoryIndex;
pub use qdrant_facade::QdrantIndex;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sync_common::{Fingerprint, Modality};
use tracing::info;

/// Metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub modality: Modality,
    pub fingerprint: Fingerprint,
    pub original_path: String,
}

/// A single nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub path: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Remote vector collection.
pub trait VectorIndex: Send + Sync {
    /// Vector size the collection expects.
    fn dimension(&self) -> usize;

    /// Creates the collection when missing and checks its vector size otherwise.
    ///
    /// A size mismatch is [`IndexError::DimensionMismatch`] (fatal at startup).
    fn ensure_collection(&self) -> BoxFuture<'_, Result<(), IndexError>>;

    /// Inserts or replaces the entry for `id`. Returns once the write is applied.
    fn upsert<'a>(
        &'a self,
        id: &'a str,
        vector: Vec<f32>,
        metadata: EntryMetadata,
    ) -> BoxFuture<'a, Result<(), IndexError>>;

    /// Removes the entry for `id`. Absent ids are not an error.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), IndexError>>;

    /// Top `top_n` entries by descending cosine similarity.
    fn search(&self, vector: Vec<f32>, top_n: usize)
    -> BoxFuture<'_, Result<Vec<IndexHit>, IndexError>>;
}

/// Builds the configured backend. Construct once at startup and share.
pub fn connect(cfg: &IndexConfig) -> Result<Arc<dyn VectorIndex>, IndexError> {
    info!(
        target: "vector_index",
        backend = ?cfg.backend,
        collection = %cfg.collection,
        dim = cfg.dim,
        "connecting vector index"
    );
    match cfg.backend {
        IndexBackend::Qdrant => Ok(Arc::new(QdrantIndex::new(cfg)?)),
        IndexBackend::Memory => Ok(Arc::new(MemoryIndex::new(cfg.dim))),
    }
}

/// Cosine similarity; zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Orders hits by descending score, ties by ascending path.
pub fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
}
