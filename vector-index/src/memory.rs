//! In-memory index for tests and local runs without Qdrant.
//!
//! Brute-force cosine similarity over every stored vector. Writes are
//! applied under a lock before the call returns, which gives the same
//! read-after-write guarantee as the Qdrant backend.

use std::collections::HashMap;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::IndexError;
use crate::{EntryMetadata, IndexHit, VectorIndex, cosine_similarity, sort_hits};

/// In-memory [`VectorIndex`].
pub struct MemoryIndex {
    dim: usize,
    entries: RwLock<HashMap<String, (Vec<f32>, EntryMetadata)>>,
}

impl MemoryIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Stored vector and metadata for `id`, if any.
    pub async fn get(&self, id: &str) -> Option<(Vec<f32>, EntryMetadata)> {
        self.entries.read().await.get(id).cloned()
    }

    fn check_dim(&self, len: usize) -> Result<(), IndexError> {
        if len != self.dim {
            return Err(IndexError::DimensionMismatch {
                got: len,
                want: self.dim,
            });
        }
        Ok(())
    }
}

impl VectorIndex for MemoryIndex {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn ensure_collection(&self) -> BoxFuture<'_, Result<(), IndexError>> {
        async { Ok(()) }.boxed()
    }

    fn upsert<'a>(
        &'a self,
        id: &'a str,
        vector: Vec<f32>,
        metadata: EntryMetadata,
    ) -> BoxFuture<'a, Result<(), IndexError>> {
        async move {
            self.check_dim(vector.len())?;
            self.entries
                .write()
                .await
                .insert(id.to_string(), (vector, metadata));
            debug!(path = %id, "memory upsert");
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), IndexError>> {
        async move {
            let removed = self.entries.write().await.remove(id).is_some();
            debug!(path = %id, removed, "memory delete");
            Ok(())
        }
        .boxed()
    }

    fn search(
        &self,
        vector: Vec<f32>,
        top_n: usize,
    ) -> BoxFuture<'_, Result<Vec<IndexHit>, IndexError>> {
        async move {
            self.check_dim(vector.len())?;
            let entries = self.entries.read().await;
            let mut hits: Vec<IndexHit> = entries
                .iter()
                .map(|(path, (stored, _))| IndexHit {
                    path: path.clone(),
                    score: cosine_similarity(&vector, stored),
                })
                .collect();
            sort_hits(&mut hits);
            hits.truncate(top_n);
            Ok(hits)
        }
        .boxed()
    }
}
