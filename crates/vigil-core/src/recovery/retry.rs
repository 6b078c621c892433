//! Retry policy for backend calls
//!
//! The policy is a pure configuration object: it computes the delay for an
//! attempt index and decides whether an error deserves another attempt.

use super::backoff::{
    BackoffKind, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff, apply_jitter,
};
use super::{ErrorClass, classify_error};
use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Retry configuration
///
/// # Example
/// ```
/// use vigil_core::recovery::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(5)
///     .with_base_delay(Duration::from_millis(200))
///     .with_max_delay(Duration::from_secs(10));
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff curve
    pub backoff: BackoffKind,
    /// Growth factor for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff: BackoffKind::Exponential,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: BackoffKind::Constant,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set max attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff curve
    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the exponential growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the values are usable
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_attempts == 0 {
            return Err(StorageError::config("retry.max_attempts must be at least 1"));
        }
        if self.base_delay > self.max_delay {
            return Err(StorageError::config(
                "retry.base_delay must not exceed retry.max_delay",
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(StorageError::config("retry.multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Build the backoff strategy described by this config
    pub fn create_backoff(&self) -> Box<dyn BackoffStrategy> {
        match self.backoff {
            BackoffKind::Constant => Box::new(ConstantBackoff::new(self.base_delay)),
            BackoffKind::Linear => Box::new(LinearBackoff::new(
                self.base_delay,
                self.base_delay,
                self.max_delay,
            )),
            BackoffKind::Exponential => Box::new(ExponentialBackoff::new(
                self.base_delay,
                self.max_delay,
                self.multiplier,
            )),
        }
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded
    Success(T),
    /// Operation failed, either terminally or after all attempts
    Failed {
        /// The last error
        error: StorageError,
        /// Total attempts made
        attempts: u32,
        /// Total time spent
        elapsed: Duration,
    },
    /// Operation was cancelled
    Cancelled,
}

impl<T> RetryResult<T> {
    /// Check if the result is successful
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert to a Result; cancellation maps to `NoAvailableBackend`
    pub fn into_result(self) -> StorageResult<T> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failed { error, .. } => Err(error),
            Self::Cancelled => Err(StorageError::NoAvailableBackend),
        }
    }
}

/// Retry policy for operations
pub struct RetryPolicy {
    config: RetryConfig,
    backoff: Box<dyn BackoffStrategy>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy from config
    pub fn new(config: RetryConfig) -> Self {
        let backoff = config.create_backoff();
        Self { config, backoff }
    }

    /// Replace the backoff strategy
    pub fn with_backoff<B: BackoffStrategy + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Get the config
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total attempts allowed per call
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for_attempt(attempt);
        if self.config.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Whether `error` from attempt `attempt` (0-indexed) deserves another try
    pub fn should_retry(&self, error: &StorageError, attempt: u32) -> bool {
        if attempt + 1 >= self.max_attempts() {
            return false;
        }
        matches!(classify_error(error), ErrorClass::Transient)
    }

    /// Execute an operation with retries
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        cancel_token: Option<CancellationToken>,
    ) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            if let Some(ref token) = cancel_token {
                if token.is_cancelled() {
                    return RetryResult::Cancelled;
                }
            }

            match operation().await {
                Ok(result) => return RetryResult::Success(result),
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return RetryResult::Failed {
                            error,
                            attempts: attempt + 1,
                            elapsed: start.elapsed(),
                        };
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        ?delay,
                        error = %error,
                        "retrying after transient failure"
                    );
                    attempt += 1;

                    if let Some(ref token) = cancel_token {
                        tokio::select! {
                            _ = token.cancelled() => return RetryResult::Cancelled,
                            _ = sleep(delay) => {}
                        }
                    } else {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
