//! Retry with classified exponential backoff.
//!
//! Each attempt races the operation against a per-attempt timeout.
//! Failures are classified, recorded in the bounded history and reported
//! to the circuit breaker. The wait before the next attempt grows
//! exponentially from a base that depends on the failure type:
//!
//! | Failure type | Base delay |
//! |--------------|------------|
//! | RateLimit | max(base x 2, 5s) |
//! | Timeout | max(base x 1.5, 2s) |
//! | anything else | base |
//!
//! Jitter is additive (10-30% of the exponential delay), so the delay
//! never drops below the un-jittered value.

use bulwark_core::{ErrorClassifier, FailureType, OperationError};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::history::{RetryAttempt, RetryHistory};
use crate::config::{humantime_duration, ConfigError};

const RATE_LIMIT_MIN_BASE: f64 = 5.0;
const RATE_LIMIT_MULTIPLIER: f64 = 2.0;
const TIMEOUT_MIN_BASE: f64 = 2.0;
const TIMEOUT_MULTIPLIER: f64 = 1.5;
const JITTER_MIN: f64 = 0.1;
const JITTER_MAX: f64 = 0.3;

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before giving up; 0 behaves like 1 (no retry)
    pub max_retries: u32,

    /// Deadline for each individual attempt
    #[serde(with = "humantime_duration")]
    pub per_attempt_timeout: Duration,

    #[serde(with = "humantime_duration")]
    pub base_delay: Duration,

    /// Cap on the un-jittered delay
    #[serde(with = "humantime_duration")]
    pub max_delay: Duration,

    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            per_attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Total attempts the loop will make.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay before the attempt after `attempt`, without jitter.
    pub fn base_delay_for(&self, attempt: u32, failure_type: FailureType) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let adjusted = match failure_type {
            FailureType::RateLimit => (base * RATE_LIMIT_MULTIPLIER).max(RATE_LIMIT_MIN_BASE),
            FailureType::Timeout => (base * TIMEOUT_MULTIPLIER).max(TIMEOUT_MIN_BASE),
            _ => base,
        };

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = adjusted * self.exponential_base.powi(exponent);
        let capped = exponential.min(self.max_delay.as_secs_f64()).max(0.0);

        // Unvalidated policies (negative base, NaN) degrade to a bounded delay
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay before the attempt after `attempt`, with additive jitter.
    pub fn delay_for(&self, attempt: u32, failure_type: FailureType) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        with_jitter(self.base_delay_for(attempt, failure_type), factor)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "retry.per_attempt_timeout must be positive".to_string(),
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.exponential_base must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay must not be smaller than retry.base_delay".to_string(),
            ));
        }
        Ok(())
    }
}

fn with_jitter(delay: Duration, factor: f64) -> Duration {
    delay + delay.mul_f64(factor)
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded
    Success(T),

    /// Attempts ran out or the circuit opened; the caller substitutes a fallback
    Exhausted {
        last_error: anyhow::Error,
        last_failure_type: FailureType,
        attempts: u32,
    },

    /// The operation reported cancellation; never retried
    Cancelled(anyhow::Error),
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

/// Runs an operation under a retry policy against one circuit breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Arc<ErrorClassifier>,
    history: Arc<RetryHistory>,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        classifier: Arc<ErrorClassifier>,
        history: Arc<RetryHistory>,
    ) -> Self {
        Self {
            policy,
            classifier,
            history,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, attempts run out, or the breaker opens.
    ///
    /// Dropping the returned future cancels the loop immediately, including
    /// during a backoff wait.
    pub async fn execute<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        operation_name: &str,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.policy.per_attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::Error::new(OperationError::Timeout(
                    self.policy.per_attempt_timeout,
                ))),
            };

            let error = match result {
                Ok(value) => {
                    breaker.record_success();
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            provider = breaker.key(),
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return RetryOutcome::Success(value);
                }
                Err(error) => error,
            };

            if is_cancellation(&error) {
                tracing::debug!(operation = operation_name, attempt, "Operation cancelled");
                return RetryOutcome::Cancelled(error);
            }

            let failure_type = self.classifier.classify(as_std_error(&error));
            self.history.record(RetryAttempt {
                attempt_number: attempt,
                failure_type,
                error_message: format!("{error:#}"),
                timestamp: Utc::now(),
            });
            breaker.record_failure(failure_type);

            if attempt >= attempts || breaker.is_tripped() {
                tracing::warn!(
                    operation = operation_name,
                    provider = breaker.key(),
                    attempts = attempt,
                    failure_type = %failure_type,
                    error = %error,
                    "Retries exhausted"
                );
                return RetryOutcome::Exhausted {
                    last_error: error,
                    last_failure_type: failure_type,
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay_for(attempt, failure_type);
            tracing::warn!(
                operation = operation_name,
                provider = breaker.key(),
                attempt,
                failure_type = %failure_type,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_cancellation(error: &anyhow::Error) -> bool {
    error.chain().any(|e| {
        e.downcast_ref::<OperationError>()
            .map(OperationError::is_cancelled)
            .unwrap_or(false)
    })
}

pub(crate) fn as_std_error(error: &anyhow::Error) -> &(dyn StdError + 'static) {
    error.as_ref()
}
