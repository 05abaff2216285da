//! Bounded retry with exponential backoff for network-sensitive operations

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many extra attempts to make and how long to wait before the first one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first; 0 disables retrying
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The backoff doubles after every failure.
pub async fn retry<T, E, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempts += 1;
        debug!("{} attempt {} of {}", label, attempts, policy.max_attempts());

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts >= policy.max_attempts() => {
                if attempts > 1 {
                    warn!("{} failed after {} attempts", label, attempts);
                }
                return Err(e);
            }
            Err(e) if is_retryable(&e) => {
                warn!(
                    "{} failed (attempt {}), retrying in {}ms: {}",
                    label,
                    attempts,
                    backoff.as_millis(),
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                debug!("{} failed with non-retryable error: {}", label, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = retry(
            "op",
            RetryPolicy::new(3, 1),
            |_| true,
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            },
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry(
            "op",
            RetryPolicy::new(2, 1),
            |_| true,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry(
            "op",
            RetryPolicy::new(5, 1),
            |e: &String| e != "fatal",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_none() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
