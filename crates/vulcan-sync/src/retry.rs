//! Bounded retry with exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use vulcan_core::config::RetrySettings;
use vulcan_core::error::AppError;

/// Retry policy with exponentially growing delays.
///
/// The delay before retry `n` (counting completed failed attempts from zero)
/// is `base_delay * multiplier^n`, capped at `max_delay`. Only errors whose
/// [`AppError::is_retryable`] is true are retried; everything else propagates
/// immediately with its attempt budget unspent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy with the given total attempt budget and the default
    /// delay curve of 1s doubling up to 10s.
    ///
    /// `max_attempts` counts the first attempt too and is clamped to at
    /// least 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Builds a policy from the configured retry settings.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts)
            .with_base_delay(settings.base_delay())
            .with_max_delay(settings.max_delay())
            .with_multiplier(settings.multiplier)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Runs `operation`, retrying transient failures until it succeeds or
    /// the attempt budget is exhausted.
    ///
    /// Returns the last error when every attempt failed.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut failures = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if failures > 0 {
                        debug!(attempt = failures + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    failures += 1;
                    if !err.is_retryable() || failures >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(failures - 1);
                    warn!(
                        attempt = failures,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}
