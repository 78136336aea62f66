//! Environment-driven configuration helpers shared by every crate.
//!
//! Config structs expose `from_env()` for production and `from_lookup()`
//! for tests, so tests never mutate the process environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// Variable is set but cannot be parsed.
    #[error("failed to parse env variable {key} = '{value}'")]
    Parse { key: &'static str, value: String },

    /// Variable parsed but the value is not acceptable.
    #[error("invalid configuration for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Source of configuration values (the process env or a test map).
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Non-empty, trimmed value or `None`.
pub fn opt_string(env: &impl EnvLookup, key: &'static str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn string_or(env: &impl EnvLookup, key: &'static str, default: &str) -> String {
    opt_string(env, key).unwrap_or_else(|| default.to_string())
}

/// Parses an optional value; unset or empty yields `Ok(None)`.
pub fn parse_opt<T: FromStr>(env: &impl EnvLookup, key: &'static str) -> Result<Option<T>, ConfigError> {
    match opt_string(env, key) {
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse { key, value: v }),
        None => Ok(None),
    }
}

pub fn parse_or<T: FromStr>(env: &impl EnvLookup, key: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(env, key)?.unwrap_or(default))
}

pub fn millis_or(env: &impl EnvLookup, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_or(env, key, default_ms).map(Duration::from_millis)
}

pub fn secs_or(env: &impl EnvLookup, key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    parse_or(env, key, default_secs).map(Duration::from_secs)
}

/// Comma-separated list; unset yields the defaults.
pub fn list_or(env: &impl EnvLookup, key: &'static str, default: &[&str]) -> Vec<String> {
    match opt_string(env, key) {
        Some(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Validates that an endpoint starts with `http://` or `https://`.
pub fn validate_http_endpoint(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: "must start with http:// or https://".into(),
        })
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
    fn parses_and_defaults() {
        let env = lookup(&[("N", " 7 "), ("EMPTY", "  "), ("BAD", "x")]);
        assert_eq!(parse_or(&env, "N", 1usize).unwrap(), 7);
        assert_eq!(parse_or(&env, "EMPTY", 3usize).unwrap(), 3);
        assert_eq!(parse_or(&env, "UNSET", 4usize).unwrap(), 4);
        assert!(matches!(
            parse_or(&env, "BAD", 0usize),
            Err(ConfigError::Parse { key: "BAD", .. })
        ));
    }

    #[test]
    fn splits_lists() {
        let env = lookup(&[("L", "a, b,,c")]);
        assert_eq!(list_or(&env, "L", &[]), vec!["a", "b", "c"]);
        assert_eq!(list_or(&env, "M", &["z"]), vec!["z"]);
    }

    #[test]
    fn endpoint_scheme_is_checked() {
        assert!(validate_http_endpoint("U", "http://x:1").is_ok());
        assert!(validate_http_endpoint("U", "x:1").is_err());
    }
}
