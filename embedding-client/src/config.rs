//! Embedding client configuration loaded from the environment.
//!
//! - `EMBEDDING_SERVICE_URL`    = base URL of the embedding service
//! - `EMBEDDING_DIM`            = fixed vector size (must match the vector index)
//! - `EMBEDDING_TIMEOUT_SECS`   = per-call deadline
//! - `EMBEDDING_TEXT_MAX_CHARS` = text payload clamp

use std::time::Duration;

use sync_common::env::{self, EnvLookup, ProcessEnv};
use sync_common::ConfigError;

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub dim: usize,
    pub timeout: Duration,
    pub text_max_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            dim: 512,
            timeout: Duration::from_secs(30),
            text_max_chars: 2000,
        }
    }
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(lookup: &impl EnvLookup) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            endpoint: env::string_or(lookup, "EMBEDDING_SERVICE_URL", &d.endpoint),
            dim: env::parse_or(lookup, "EMBEDDING_DIM", d.dim)?,
            timeout: env::secs_or(lookup, "EMBEDDING_TIMEOUT_SECS", d.timeout.as_secs())?,
            text_max_chars: env::parse_or(lookup, "EMBEDDING_TEXT_MAX_CHARS", d.text_max_chars)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        env::validate_http_endpoint("EMBEDDING_SERVICE_URL", self.endpoint.trim())?;
        if self.dim == 0 {
            return Err(ConfigError::Invalid {
                key: "EMBEDDING_DIM",
                reason: "must be > 0".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "EMBEDDING_TIMEOUT_SECS",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }
}
