//! Bounded exponential backoff for calls to remote collaborators.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors that can tell a transient failure from a permanent one.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based): `base * 2^(failed-1)`, capped.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted. The last error is returned.
///
/// `subject` names what the call is about (a path, a query) in the logs.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    subject: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut failed = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                failed += 1;
                if !e.is_retryable() || failed >= attempts {
                    return Err(e);
                }
                let delay = policy.delay_after(failed);
                warn!(
                    target: "sync_common::retry",
                    subject = %subject,
                    op = what,
                    attempt = failed,
                    of = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum Remote {
        Down,
        Broken,
    }

    impl Display for Remote {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(match self {
                Remote::Down => "down",
                Remote::Broken => "broken",
            })
        }
    }

    impl Retryable for Remote {
        fn is_retryable(&self) -> bool {
            matches!(self, Remote::Down)
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delays_grow_and_are_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(2), Duration::from_millis(1000));
        assert_eq!(p.delay_after(3), Duration::from_millis(2000));
        assert_eq!(p.delay_after(10), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast(), "upsert", "/d/a", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Remote::Down)
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_with_backoff(&fast(), "upsert", "/d/a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Remote::Down)
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_with_backoff(&fast(), "read", "/d/a", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Remote::Broken)
        })
        .await;
        assert!(matches!(res, Err(Remote::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
