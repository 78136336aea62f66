use std::path::{Path, PathBuf};
use std::time::Duration;

use sync_common::env::{list_or, millis_or, parse_or, string_or};
use sync_common::{ConfigError, EnvLookup, ProcessEnv, RetryPolicy, normalize_path};

/// Index synchronization settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Normalized absolute watched directory.
    pub watch_root: PathBuf,
    /// JSON file holding persisted FileRecords.
    pub state_path: PathBuf,
    /// Debounce window of the filesystem watcher.
    pub debounce: Duration,
    /// How many times a still-changing file is re-checked before it is emitted anyway.
    pub settle_attempts: u32,
    pub settle_delay: Duration,
    /// Coordinator consumer pool size.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Glob excludes applied to absolute paths.
    pub exclude: Vec<String>,
    /// Max paths per manual index/remove request.
    pub manual_batch_max: usize,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::Invalid {
            key: "WATCH_ROOT",
            reason: format!("cannot resolve current directory: {e}"),
        })?;

        let root = string_or(env, "WATCH_ROOT", "/data");
        let state = string_or(env, "SYNC_STATE_PATH", "./state/file_records.json");

        let cfg = Self {
            watch_root: PathBuf::from(normalize_path(Path::new(&root), &cwd)),
            state_path: PathBuf::from(normalize_path(Path::new(&state), &cwd)),
            debounce: millis_or(env, "SYNC_DEBOUNCE_MS", 500)?,
            settle_attempts: parse_or(env, "SYNC_SETTLE_ATTEMPTS", 5u32)?,
            settle_delay: millis_or(env, "SYNC_SETTLE_DELAY_MS", 200)?,
            workers: parse_or(env, "SYNC_WORKERS", 2usize)?,
            retry: RetryPolicy {
                attempts: parse_or(env, "SYNC_RETRY_ATTEMPTS", 3u32)?,
                base_delay: millis_or(env, "SYNC_RETRY_BASE_MS", 500)?,
                max_delay: millis_or(env, "SYNC_RETRY_MAX_MS", 8000)?,
            },
            exclude: list_or(env, "SYNC_EXCLUDE", &["**/.*", "**/.git/**"]),
            manual_batch_max: parse_or(env, "SYNC_MANUAL_BATCH_MAX", 50usize)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_WORKERS",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_RETRY_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid {
                key: "SYNC_RETRY_BASE_MS",
                reason: "must not exceed SYNC_RETRY_MAX_MS".into(),
            });
        }
        if self.manual_batch_max == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_MANUAL_BATCH_MAX",
                reason: "must be at least 1".into(),
            });
        }
        crate::filter::PathFilter::new(&self.watch_root, &self.exclude)?;
        Ok(())
    }

    /// Watched root as the normalized string key used for records.
    pub fn root_key(&self) -> String {
        self.watch_root.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = SyncConfig::from_lookup(&lookup(&[])).unwrap();
        assert_eq!(cfg.watch_root, PathBuf::from("/data"));
        assert_eq!(cfg.debounce, Duration::from_millis(500));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.exclude, vec!["**/.*", "**/.git/**"]);
        assert_eq!(cfg.manual_batch_max, 50);
        assert!(cfg.state_path.is_absolute());
    }

    #[test]
    fn overrides_and_normalizes_root() {
        let cfg = SyncConfig::from_lookup(&lookup(&[
            ("WATCH_ROOT", "/srv/files/./docs/"),
            ("SYNC_WORKERS", "4"),
            ("SYNC_EXCLUDE", "**/*.tmp"),
        ]))
        .unwrap();
        assert_eq!(cfg.root_key(), "/srv/files/docs");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.exclude, vec!["**/*.tmp"]);
    }

    #[test]
    fn rejects_zero_workers_and_bad_globs() {
        assert!(SyncConfig::from_lookup(&lookup(&[("SYNC_WORKERS", "0")])).is_err());
        assert!(SyncConfig::from_lookup(&lookup(&[("SYNC_EXCLUDE", "a[")])).is_err());
        assert!(
            SyncConfig::from_lookup(&lookup(&[
                ("SYNC_RETRY_BASE_MS", "9000"),
                ("SYNC_RETRY_MAX_MS", "100"),
            ]))
            .is_err()
        );
    }
}
