use std::time::Duration;

use sync_common::env::{millis_or, parse_opt, parse_or};
use sync_common::{ConfigError, EnvLookup, ProcessEnv, RetryPolicy};

/// Search tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// `top_n` used when the query does not set one.
    pub default_top_n: usize,
    /// Largest accepted `top_n`.
    pub max_top_n: usize,
    /// Weight of the text vector in a fused query; 0.5 is the plain average.
    pub text_weight: f32,
    /// Hits scoring below this are dropped.
    pub min_score: Option<f32>,
    /// Backoff for the query embedding and the index search. Kept short: a caller is waiting.
    pub retry: RetryPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_n: 5,
            max_top_n: 100,
            text_weight: 0.5,
            min_score: None,
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
            },
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            default_top_n: parse_or(env, "SEARCH_DEFAULT_TOP_N", d.default_top_n)?,
            max_top_n: parse_or(env, "SEARCH_MAX_TOP_N", d.max_top_n)?,
            text_weight: parse_or(env, "SEARCH_TEXT_WEIGHT", d.text_weight)?,
            min_score: parse_opt(env, "SEARCH_MIN_SCORE")?,
            retry: RetryPolicy {
                attempts: parse_or(env, "SEARCH_RETRY_ATTEMPTS", d.retry.attempts)?,
                base_delay: millis_or(env, "SEARCH_RETRY_BASE_MS", d.retry.base_delay.as_millis() as u64)?,
                max_delay: millis_or(env, "SEARCH_RETRY_MAX_MS", d.retry.max_delay.as_millis() as u64)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_top_n == 0 {
            return Err(ConfigError::Invalid {
                key: "SEARCH_MAX_TOP_N",
                reason: "must be at least 1".into(),
            });
        }
        if self.default_top_n == 0 || self.default_top_n > self.max_top_n {
            return Err(ConfigError::Invalid {
                key: "SEARCH_DEFAULT_TOP_N",
                reason: format!("must be within 1..={}", self.max_top_n),
            });
        }
        if !(0.0..=1.0).contains(&self.text_weight) {
            return Err(ConfigError::Invalid {
                key: "SEARCH_TEXT_WEIGHT",
                reason: "must be within 0.0..=1.0".into(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "SEARCH_RETRY_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(min) = self.min_score {
            if !(-1.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid {
                    key: "SEARCH_MIN_SCORE",
                    reason: "must be within -1.0..=1.0".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_bounds() {
        let cfg = SearchConfig::from_lookup(&|_: &str| -> Option<String> { None }).unwrap();
        assert_eq!(cfg, SearchConfig::default());

        let bad_weight = |k: &str| (k == "SEARCH_TEXT_WEIGHT").then(|| "1.5".to_string());
        assert!(SearchConfig::from_lookup(&bad_weight).is_err());

        let bad_default = |k: &str| (k == "SEARCH_DEFAULT_TOP_N").then(|| "500".to_string());
        assert!(SearchConfig::from_lookup(&bad_default).is_err());
    }
}
