//! Client for the remote embedding function `embed(modality, payload) -> vector`.
//!
//! Text and images share one vector space (CLIP-style model), so the
//! vectors produced here are directly comparable and can be fused.
//!
//! - [`Embedder`] is the seam used by the coordinator and the search
//!   orchestrator; [`HttpEmbedder`] is the production implementation.
//! - Every call carries a deadline; failures are classified into
//!   [`EmbedError::InvalidInput`], [`EmbedError::Unavailable`] and
//!   [`EmbedError::Timeout`].
//! - Dimensionality is fixed by configuration and checked once at startup
//!   with [`verify_dimension`].

mod config;
pub mod error_handler;
mod http_service;

pub use config::EmbeddingConfig;
pub use error_handler::{EmbedError, Result};
pub use http_service::HttpEmbedder;

use futures::future::BoxFuture;
use sync_common::Modality;
use tracing::info;

/// Input for a single embedding call. The variant is the modality.
#[derive(Debug, Clone, Copy)]
pub enum EmbedPayload<'a> {
    Text(&'a str),
    Image(&'a [u8]),
}

impl EmbedPayload<'_> {
    pub fn modality(&self) -> Modality {
        match self {
            EmbedPayload::Text(_) => Modality::Text,
            EmbedPayload::Image(_) => Modality::Image,
        }
    }
}

/// Remote embedding function.
///
/// Implementations are stateless apart from connection reuse and must be
/// shareable across tasks.
pub trait Embedder: Send + Sync {
    /// Fixed output dimensionality.
    fn dimension(&self) -> usize;

    /// Embeds one payload. Returned vectors always have [`Self::dimension`] entries.
    fn embed<'a>(&'a self, payload: EmbedPayload<'a>) -> BoxFuture<'a, Result<Vec<f32>>>;
}

/// Startup check: the remote model must produce vectors of the configured size.
///
/// # Errors
/// [`EmbedError::DimensionMismatch`] is a fatal configuration error; transport
/// errors are returned as-is so the caller can decide whether to wait.
pub async fn verify_dimension(embedder: &dyn Embedder) -> Result<()> {
    let vector = embedder.embed(EmbedPayload::Text("dimension probe")).await?;
    if vector.len() != embedder.dimension() {
        return Err(EmbedError::DimensionMismatch {
            got: vector.len(),
            want: embedder.dimension(),
        });
    }
    info!(
        target: "embedding_client",
        dim = vector.len(),
        "embedding dimension verified"
    );
    Ok(())
}
