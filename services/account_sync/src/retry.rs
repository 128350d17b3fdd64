//! Bounded retry with exponential backoff for background reloads

use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use sync_config::RetryConfig;
use tracing::{debug, warn};

/// Retry budget for one background action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget runs out
    ///
    /// Non-recoverable errors return immediately. When the budget is spent
    /// the final error is wrapped in [`SyncError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, action: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("{} failed after {} attempts: {}", action, attempt, e);
                    return Err(SyncError::RetriesExhausted {
                        action,
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    debug!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        action, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .run("reload", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Client(ClientError::Rpc("timeout".into())))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(SyncError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = policy(2)
            .run("reload", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SyncError::transport("reset"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_precondition_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(5)
            .run("reload", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::NoAccountSelected)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(SyncError::NoAccountSelected)));
    }
}
