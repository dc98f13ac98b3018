//! Bounded retry with exponential backoff

use crate::config::RetryConfig;
use crate::core::pipeline::cancel::Cancellation;
use crate::domain::{Result, SluiceError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy for transient failures
///
/// Attempt `n` (1-based) that fails with a transient error waits
/// `initial_delay_ms * backoff_multiplier^(n-1)`, capped at `max_delay_ms`,
/// plus up to 25% random jitter, before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
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
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before the attempt following failed attempt `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let max_extra = (base.as_millis() as u64) / 4;
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        base + Duration::from_millis(extra)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out
    ///
    /// Only errors for which [`SluiceError::is_transient`] holds are retried.
    /// `operation` receives the 1-based attempt number. Cancellation is
    /// checked before every attempt and interrupts the backoff sleep.
    ///
    /// # Errors
    ///
    /// Returns the last error, or [`SluiceError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        table: &str,
        operation: &str,
        cancel: &Cancellation,
        f: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(table, operation, cancel, SluiceError::is_transient, f)
            .await
    }

    /// Like [`RetryPolicy::run`], retrying only errors accepted by `retryable`
    pub async fn run_if<T, F, Fut, P>(
        &self,
        table: &str,
        operation: &str,
        cancel: &Cancellation,
        retryable: P,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&SluiceError) -> bool,
    {
        let mut attempt = 1;
        loop {
            cancel.check(operation)?;

            let error = match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !retryable(&error) || attempt >= self.max_attempts {
                if attempt > 1 && retryable(&error) {
                    tracing::error!(
                        table = %table,
                        operation = %operation,
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                }
                return Err(error);
            }

            let delay = self.delay(attempt);
            crate::log_retry_attempt!(
                table,
                operation,
                attempt,
                self.max_attempts,
                delay.as_millis() as u64,
                error
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(SluiceError::Cancelled(format!(
                        "run cancelled while waiting to retry {operation}"
                    )));
                }
            }
            attempt += 1;
        }
    }
}
