use std::sync::Arc;

use chrono::{DateTime, Utc};
use file_search::SearchOrchestrator;
use index_sync::SyncHandle;
use sync_common::env::parse_or;
use sync_common::{ConfigError, EnvLookup, ProcessEnv, env::string_or};

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Query path: embeds and ranks.
    pub search: Arc<SearchOrchestrator>,
    /// Manual index/remove calls and health counters.
    pub sync: SyncHandle,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(search: Arc<SearchOrchestrator>, sync: SyncHandle) -> Self {
        Self {
            search,
            sync,
            started_at: Utc::now(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Bind address, e.g. "0.0.0.0:8080".
    pub address: String,
    /// Request body limit; bounds uploaded query images.
    pub max_upload_bytes: usize,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let mb: usize = parse_or(env, "API_MAX_UPLOAD_MB", 20)?;
        let max_upload_bytes = mb
            .checked_mul(1024 * 1024)
            .filter(|bytes| *bytes > 0)
            .ok_or_else(|| ConfigError::Invalid {
                key: "API_MAX_UPLOAD_MB",
                reason: format!("must be within 1..={}", usize::MAX / (1024 * 1024)),
            })?;
        Ok(Self {
            address: string_or(env, "API_ADDRESS", "0.0.0.0:8080"),
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ApiConfig::from_lookup(&|_: &str| -> Option<String> { None }).unwrap();
        assert_eq!(cfg.address, "0.0.0.0:8080");
        assert_eq!(cfg.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn upload_limit_is_bounded() {
        let zero = |k: &str| (k == "API_MAX_UPLOAD_MB").then(|| "0".to_string());
        assert!(ApiConfig::from_lookup(&zero).is_err());

        let huge = |k: &str| (k == "API_MAX_UPLOAD_MB").then(|| usize::MAX.to_string());
        assert!(matches!(
            ApiConfig::from_lookup(&huge),
            Err(ConfigError::Invalid { key: "API_MAX_UPLOAD_MB", .. })
        ));
    }
}
