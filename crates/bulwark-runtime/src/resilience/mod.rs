//! Resilience patterns for bulwark-runtime.
//!
//! This module provides:
//! - Per-key circuit breakers to prevent cascade failures
//! - Retry with classified backoff
//! - Bounded retry history

mod circuit_breaker;
mod history;
mod retry;

pub use circuit_breaker::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use history::{RetryAttempt, RetryHistory, HISTORY_CAPACITY, HISTORY_RETAIN};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
