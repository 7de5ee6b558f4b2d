// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for endpoint bootstrap.
//!
//! The engine itself never retries: a failed read or write is scoped to its
//! collection. Retries only apply before the run, while connecting.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> collection_replicator::Result<()> {
//! use collection_replicator::resilience::{retry_with_backoff, RetryConfig};
//!
//! let value = retry_with_backoff("source", &RetryConfig::startup(), || async {
//!     // connect + ping
//!     Ok::<_, collection_replicator::ReplicationError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ReplicationError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retry).
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual connection attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Retry for the CLI's initial connection.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay     Cumulative
    /// -------  -----     ----------
    /// 1        500ms     500ms
    /// 2        750ms     1.25s
    /// 3        1.12s     2.37s
    /// 4        1.69s     4.06s
    /// 5        (fail)
    /// ```
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 1.5,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));

        std::cmp::min(delay, self.max_delay)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached.
///
/// Each attempt is bounded by `config.connection_timeout`. The last error is
/// returned as a [`ReplicationError::Connection`] for `endpoint` unless it
/// already is one.
pub async fn retry_with_backoff<T, F, Fut>(
    endpoint: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let message = match timeout(config.connection_timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if attempt >= max_attempts => {
                error!(endpoint, attempt, error = %e, "Failed to connect after max retries");
                return Err(match e {
                    ReplicationError::Connection { .. } => e,
                    other => ReplicationError::Connection {
                        endpoint: endpoint.to_string(),
                        message: format!("failed after {attempt} attempts: {other}"),
                    },
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) if attempt >= max_attempts => {
                error!(
                    endpoint,
                    attempt,
                    timeout_ms = config.connection_timeout.as_millis(),
                    "Connection timed out after max retries"
                );
                return Err(ReplicationError::Connection {
                    endpoint: endpoint.to_string(),
                    message: format!(
                        "timed out after {attempt} attempts ({}ms timeout)",
                        config.connection_timeout.as_millis()
                    ),
                });
            }
            Err(_) => "attempt timed out".to_string(),
        };

        let delay = config.delay_for_attempt(attempt);
        warn!(
            endpoint,
            attempt,
            delay_ms = delay.as_millis(),
            error = %message,
            "Connection attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_startup_config() {
        let config = RetryConfig::startup();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
        // Should cap at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_for_attempt_zero() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), config.initial_delay);
    }

    #[test]
    fn test_delay_for_large_attempt_does_not_overflow() {
        let config = RetryConfig::testing();
        assert_eq!(config.delay_for_attempt(5000), config.max_delay);
    }

    #[test]
    fn test_none_is_single_attempt() {
        assert_eq!(RetryConfig::none().max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff("source", &RetryConfig::testing(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ReplicationError::Internal("refused".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_with_connection_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff("target", &RetryConfig::testing(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ReplicationError::Internal("auth failed".into())) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("target"));
        assert!(err.to_string().contains("auth failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_times_out_hung_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            ..RetryConfig::testing()
        };
        let result: Result<()> = retry_with_backoff("source", &config, || async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out after 2 attempts"));
    }
}
