//! Retry policy shared by every fallible remote call
//!
//! Exponential backoff with a small fixed attempt cap. Only errors for which
//! [`SyncError::is_transient`] holds are retried; anything else returns on
//! the first attempt.
//!
//! [`SyncError::is_transient`]: crate::domain::errors::SyncError::is_transient

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::errors::SyncResult;
use crate::infrastructure::config::RetryConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Backoff multiplier (2.0 doubles each time)
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Adds 0-50% random jitter on top of the computed delay.
    pub jitter: bool,
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
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    #[cfg(test)]
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before attempt `attempt + 1`, for a 1-based failed `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_nanos() as f64);
        let with_jitter = if self.jitter {
            capped * (1.0 + fastrand::f64() * 0.5)
        } else {
            capped
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = with_jitter.max(0.0).round() as u64;
        Duration::from_nanos(nanos)
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `call` receives the 0-based attempt number so callers can rotate to an
    /// alternate upstream host.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "🔄 {} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, delay, error
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_transient() {
                        debug!("❌ {} exhausted {} attempts", operation, self.max_attempts);
                    }
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("fetch", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(SyncError::transient("item/1", "503"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: SyncResult<()> = RetryPolicy::immediate(3)
            .run("fetch", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::transient("item/1", "timeout")) }
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: SyncResult<()> = RetryPolicy::immediate(5)
            .run("fetch", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::AuthRequired {
                        message: "session expired".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(SyncError::AuthRequired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
