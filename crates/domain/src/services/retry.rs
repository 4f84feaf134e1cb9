//! Bounded exponential backoff around store calls.
//!
//! Every mutating store call in the engines runs through [`RetryExecutor`].
//! Each attempt is capped by a timeout; busy/locked signals and timeouts are
//! retried on a doubling schedule until the attempt ceiling, after which the
//! caller sees [`PoolError::StoreBusy`]. Permanent failures come back after
//! the first attempt. Cancellation is observed between attempts only, so an
//! attempt that already started is allowed to finish.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use metrics::counter;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::services::error::PoolError;
use crate::storage::{StorageError, StorageResult};

/// Retry knobs. Defaults match the single-writer SQLite deployment: five
/// attempts, 100 ms doubling delay and a 10 s cap per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = limit;
        self
    }

    /// Backoff schedule between attempts; yields `max_attempts - 1` delays.
    pub fn build_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay.max(self.base_delay))
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails permanently, exhausts the
    /// attempt budget or `cancel` fires between two attempts.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, PoolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut delays = self.policy.build_strategy().build();
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }
            attempts += 1;

            let outcome = match timeout(self.policy.attempt_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(
                    self.policy.attempt_timeout.as_millis() as u64,
                )),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "store call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(PoolError::Store(err.to_string()));
            }

            let Some(delay) = delays.next() else {
                warn!(operation, attempts, error = %err, "store busy, giving up");
                counter!("pool_store_busy_total", "operation" => operation).increment(1);
                return Err(PoolError::StoreBusy { attempts });
            };

            warn!(
                operation,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "store busy, retrying"
            );
            counter!("pool_store_retries_total", "operation" => operation).increment(1);

            tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}
