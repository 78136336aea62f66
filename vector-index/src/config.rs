//! Runtime and collection configuration.

use std::time::Duration;

use sync_common::env::{self, EnvLookup, ProcessEnv};
use sync_common::ConfigError;

/// Which backend holds the vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBackend {
    /// Remote Qdrant collection (production).
    Qdrant,
    /// Process-local brute-force index; contents are lost on restart.
    Memory,
}

/// Configuration for the vector index.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Qdrant gRPC endpoint, e.g. `http://localhost:6334`.
    pub qdrant_url: String,
    /// Optional API key for Qdrant Cloud.
    pub qdrant_api_key: Option<String>,
    /// Target collection name.
    pub collection: String,
    /// Vector dimensionality; shares `EMBEDDING_DIM` with the embedding client.
    pub dim: usize,
    /// Deadline for every call.
    pub timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Qdrant,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            collection: "files".to_string(),
            dim: 512,
            timeout: Duration::from_secs(10),
        }
    }
}

impl IndexConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(lookup: &impl EnvLookup) -> Result<Self, ConfigError> {
        let d = Self::default();
        let backend = match env::string_or(lookup, "VECTOR_BACKEND", "qdrant")
            .to_lowercase()
            .as_str()
        {
            "qdrant" => IndexBackend::Qdrant,
            "memory" => IndexBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "VECTOR_BACKEND",
                    reason: format!("unknown backend '{other}', expected qdrant or memory"),
                });
            }
        };

        let cfg = Self {
            backend,
            qdrant_url: env::string_or(lookup, "QDRANT_URL", &d.qdrant_url),
            qdrant_api_key: env::opt_string(lookup, "QDRANT_API_KEY"),
            collection: env::string_or(lookup, "QDRANT_COLLECTION_NAME", &d.collection),
            dim: env::parse_or(lookup, "EMBEDDING_DIM", d.dim)?,
            timeout: env::secs_or(lookup, "QDRANT_TIMEOUT_SECS", d.timeout.as_secs())?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == IndexBackend::Qdrant {
            env::validate_http_endpoint("QDRANT_URL", &self.qdrant_url)?;
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "QDRANT_COLLECTION_NAME",
                reason: "collection is empty".into(),
            });
        }
        if self.dim == 0 {
            return Err(ConfigError::Invalid {
                key: "EMBEDDING_DIM",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }
}
