//! Thin adapter around `qdrant-client` to isolate API usage.
//!
//! Every call is wrapped in the configured deadline. Upserts and deletes
//! are sent with `wait = true`, so success means the operation is applied
//! and visible to later searches.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct, PointsIdsList,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use sync_common::point_id;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::errors::IndexError;
use crate::{EntryMetadata, IndexHit, VectorIndex};

/// Payload key holding the file path.
const PATH_KEY: &str = "original_path";

/// Qdrant-backed [`VectorIndex`].
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dim: usize,
    timeout: Duration,
}

impl QdrantIndex {
    /// Creates the client. Does not touch any collection.
    ///
    /// # Errors
    /// Returns `IndexError::Config` for invalid settings and
    /// `IndexError::Unavailable` if the client cannot be constructed.
    pub fn new(cfg: &IndexConfig) -> Result<Self, IndexError> {
        cfg.validate()?;

        let mut builder = Qdrant::from_url(&cfg.qdrant_url).timeout(cfg.timeout);
        if let Some(key) = &cfg.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| IndexError::Unavailable(format!("client build: {e}")))?;

        Ok(Self {
            client,
            collection: cfg.collection.clone(),
            dim: cfg.dim,
            timeout: cfg.timeout,
        })
    }

    /// Runs a Qdrant call under the deadline and classifies its failure.
    async fn guarded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, QdrantError>>,
    ) -> Result<T, IndexError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(IndexError::Unavailable(format!("{op}: {e}"))),
            Err(_) => Err(IndexError::Timeout(self.timeout)),
        }
    }

    async fn ensure_collection_impl(&self) -> Result<(), IndexError> {
        let exists = self
            .guarded("collection_exists", self.client.collection_exists(&self.collection))
            .await?;

        if exists {
            let info = self
                .guarded("collection_info", self.client.collection_info(&self.collection))
                .await?;

            let size = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config)
                .and_then(|c| match c {
                    VectorsConfigKind::Params(p) => Some(p.size as usize),
                    VectorsConfigKind::ParamsMap(_) => None,
                });

            return match size {
                Some(got) if got != self.dim => {
                    Err(IndexError::DimensionMismatch { got, want: self.dim })
                }
                Some(_) => {
                    debug!(collection = %self.collection, "collection already exists");
                    Ok(())
                }
                None => {
                    warn!(
                        collection = %self.collection,
                        "collection has no single unnamed vector config; size not verified"
                    );
                    Ok(())
                }
            };
        }

        info!(
            collection = %self.collection,
            size = self.dim,
            "creating collection with cosine distance"
        );
        self.guarded(
            "create_collection",
            self.client.create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dim as u64, Distance::Cosine)),
            ),
        )
        .await?;
        Ok(())
    }

    async fn upsert_impl(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: EntryMetadata,
    ) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                got: vector.len(),
                want: self.dim,
            });
        }

        let payload = metadata_to_payload(&metadata)?;
        let point = PointStruct::new(point_id(id).to_string(), vector, payload);

        self.guarded(
            "upsert_points",
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true)),
        )
        .await?;

        debug!(path = %id, "upserted point");
        Ok(())
    }

    async fn delete_impl(&self, id: &str) -> Result<(), IndexError> {
        let ids = PointsIdsList {
            ids: vec![PointId::from(point_id(id).to_string())],
        };

        // Qdrant acknowledges deletes of unknown ids, which keeps this idempotent.
        self.guarded(
            "delete_points",
            self.client.delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(ids)
                    .wait(true),
            ),
        )
        .await?;

        debug!(path = %id, "deleted point");
        Ok(())
    }

    async fn search_impl(&self, vector: Vec<f32>, top_n: usize) -> Result<Vec<IndexHit>, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                got: vector.len(),
                want: self.dim,
            });
        }
        if top_n == 0 {
            return Ok(Vec::new());
        }

        let resp = self
            .guarded(
                "search_points",
                self.client.search_points(
                    SearchPointsBuilder::new(&self.collection, vector, top_n as u64)
                        .with_payload(true),
                ),
            )
            .await?;

        let hits = resp
            .result
            .into_iter()
            .filter_map(scored_point_to_hit)
            .collect::<Vec<_>>();

        debug!(hits = hits.len(), "search completed");
        Ok(hits)
    }
}

impl VectorIndex for QdrantIndex {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn ensure_collection(&self) -> BoxFuture<'_, Result<(), IndexError>> {
        self.ensure_collection_impl().boxed()
    }

    fn upsert<'a>(
        &'a self,
        id: &'a str,
        vector: Vec<f32>,
        metadata: EntryMetadata,
    ) -> BoxFuture<'a, Result<(), IndexError>> {
        self.upsert_impl(id, vector, metadata).boxed()
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), IndexError>> {
        self.delete_impl(id).boxed()
    }

    fn search(
        &self,
        vector: Vec<f32>,
        top_n: usize,
    ) -> BoxFuture<'_, Result<Vec<IndexHit>, IndexError>> {
        self.search_impl(vector, top_n).boxed()
    }
}

/// Converts [`EntryMetadata`] to a Qdrant [`Payload`] via JSON.
fn metadata_to_payload(metadata: &EntryMetadata) -> Result<Payload, IndexError> {
    let as_json = json!({
        PATH_KEY: metadata.original_path,
        "modality": metadata.modality.as_str(),
        "fingerprint": metadata.fingerprint.as_str(),
    });
    Payload::try_from(as_json)
        .map_err(|e| IndexError::Unavailable(format!("payload convert: {e}")))
}

/// Maps a `ScoredPoint` to a hit; points without a path payload are skipped.
fn scored_point_to_hit(sp: ScoredPoint) -> Option<IndexHit> {
    let path = match sp.payload.get(PATH_KEY).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => {
            warn!(id = ?sp.id, "search hit without {PATH_KEY} payload, skipping");
            return None;
        }
    };

    Some(IndexHit {
        path,
        score: sp.score.clamp(-1.0, 1.0),
    })
}
