//! Retry executor with capped exponential backoff.
//!
//! A transfer attempt sequence is one call to
//! [`RetryPolicy::execute_with_retry`]: the whole per-file pipeline is the
//! retried operation, not its sub-steps. Whether a failure is worth retrying
//! is the error's own business via [`RetryClass`].

mod classify;

use std::time::Duration;

use ferry_config::RetrySettings;

pub use classify::{io_error_retryable, os_error_retryable};

/// Classifies an error as transient (retry) or permanent (stop).
pub trait RetryClass {
    fn is_retryable(&self) -> bool;
}

/// Success value plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Total attempts made, including the successful one.
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Retries performed before success.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Terminal failure of an attempt sequence.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error,
{
    /// The error was classified permanent; no retry was attempted.
    #[error("{operation} failed permanently: {source}")]
    Permanent { operation: String, source: E },

    /// Every attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempts: {}", last_error_text(.errors))]
    Exhausted {
        operation: String,
        attempts: u32,
        /// Every captured attempt error, oldest first.
        errors: Vec<E>,
    },
}

impl<E: std::error::Error> RetryError<E> {
    /// The error from the final attempt, when one was captured.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Permanent { source, .. } => Some(source),
            RetryError::Exhausted { errors, .. } => errors.last(),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { .. } => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

fn last_error_text<E: std::error::Error>(errors: &[E]) -> String {
    errors
        .last()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempt errors captured".to_string())
}

/// Backoff parameters for one attempt sequence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the n-th failed attempt (1-based):
    /// `initial * multiplier^(n-1)`, capped at `max_delay`, then ±25% jitter
    /// applied after the cap so even capped waiters spread out.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.0);
        Duration::from_secs_f64(with_jitter)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts are
    /// exhausted. Total attempts = `max_retries + 1`.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + RetryClass,
    {
        let total_attempts = self.max_retries.saturating_add(1);
        let mut errors = Vec::new();

        for attempt in 1..=total_attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(RetryOutcome { value, attempts: attempt });
                }
                Err(error) if !error.is_retryable() => {
                    tracing::warn!(operation, attempt, error = %error, "permanent failure, not retrying");
                    return Err(RetryError::Permanent {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::warn!(operation, attempt, error = %error, "attempt failed");
                    errors.push(error);
                    if attempt < total_attempts {
                        let delay = self.delay_for_attempt(attempt);
                        tracing::debug!(
                            operation,
                            attempt,
                            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                            "backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            operation: operation.to_string(),
            attempts: total_attempts,
            errors,
        })
    }
}
