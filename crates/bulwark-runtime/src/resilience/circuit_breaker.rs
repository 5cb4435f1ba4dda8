//! Circuit breaker to prevent cascade failures.
//!
//! When calls to a provider fail repeatedly, its circuit opens and
//! subsequent calls fast-fail to a fallback instead of invoking it.
//! Every key (provider or agent name) has its own breaker so keys
//! recover independently.

use bulwark_core::FailureType;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{humantime_duration, ConfigError};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time after the last failure before a trial call is allowed
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Lower thresholds for test environments.
    pub fn test_mode() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(1),
        }
    }

    /// Reject a zero threshold or recovery timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "circuit_breaker.recovery_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls bypass the provider
    Open,

    /// Recovery timeout elapsed; the next outcome decides
    HalfOpen,
}

/// Side-effect-free snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_type: Option<FailureType>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_failure_type: Option<FailureType>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_failure_at: None,
            last_failure_type: None,
        }
    }
}

/// Per-key circuit breaker.
///
/// All transitions happen under one mutex, so `is_open` and the
/// `record_*` calls are atomic relative to each other. The breaker never
/// fails; callers check [`is_open`](Self::is_open) before work and report
/// the outcome after.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    /// Provider or agent name this breaker guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Thresholds this breaker was created with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if calls should bypass the provider.
    ///
    /// Once the recovery timeout has passed since the last failure, the
    /// first caller moves the circuit to half-open and is let through.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return false;
        }

        let cooling = inner
            .last_failure
            .map(|at| at.elapsed() < self.config.recovery_timeout)
            .unwrap_or(false);

        if cooling {
            true
        } else {
            inner.state = CircuitState::HalfOpen;
            tracing::info!(key = %self.key, "Circuit transitioning to half-open for recovery test");
            false
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                tracing::info!(key = %self.key, "Circuit closed after successful recovery");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Returns true if this call opened the circuit.
    pub fn record_failure(&self, failure_type: FailureType) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.last_failure_type = Some(failure_type);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    key = %self.key,
                    failure_type = %failure_type,
                    "Circuit reopened after failed recovery attempt"
                );
                true
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    key = %self.key,
                    failures = inner.consecutive_failures,
                    failure_type = %failure_type,
                    "Circuit opened after repeated failures"
                );
                true
            }
            _ => false,
        }
    }

    /// Current state, without the half-open transition `is_open` performs.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether the circuit is currently open, without side effects.
    pub fn is_tripped(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the circuit is open and still inside its recovery window.
    ///
    /// Unlike [`is_open`](Self::is_open) this never moves the circuit to
    /// half-open, so status readers can call it freely.
    pub fn is_cooling(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .last_failure
                .map(|at| at.elapsed() < self.config.recovery_timeout)
                .unwrap_or(false)
    }

    /// Snapshot for status reports.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            key: self.key.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_type: inner.last_failure_type,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Force the circuit closed and clear counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
    }
}

/// Lazily created breakers, one per key, kept for the process lifetime.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry; `default_config` applies to `get_or_create`.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Get the breaker for a key, creating it with the default config.
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(key, &self.default_config)
    }

    /// Get the breaker for a key, creating it with `config` if absent.
    ///
    /// An existing breaker keeps its original config.
    pub fn get_or_create_with(&self, key: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config.clone()))),
        )
    }

    /// The breaker for a key, if one was created.
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(key).cloned()
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Status of every breaker, ordered by key.
    pub fn statuses(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .read()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.status()))
            .collect()
    }

    /// Reset all circuits to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "anthropic",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: timeout,
            },
        )
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("anthropic", CircuitBreakerConfig::default());
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold_then_half_opens() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.record_failure(FailureType::ApiError);
        cb.record_failure(FailureType::ApiError);
        assert!(!cb.is_open());

        cb.record_failure(FailureType::ApiError);
        assert!(cb.is_open());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(1, Duration::from_secs(5));
        cb.record_failure(FailureType::Timeout);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cb.is_open());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(3, Duration::from_secs(5));
        for _ in 0..3 {
            cb.record_failure(FailureType::NetworkError);
        }
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(FailureType::NetworkError);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new("anthropic", CircuitBreakerConfig::default());

        cb.record_failure(FailureType::ApiError);
        cb.record_failure(FailureType::ApiError);

        // Success should reset
        cb.record_success();

        // Need 3 more failures to open
        cb.record_failure(FailureType::ApiError);
        cb.record_failure(FailureType::ApiError);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_success_while_open_is_noop() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure(FailureType::RateLimit);
        cb.record_success();
        assert!(cb.is_tripped());
    }

    #[test]
    fn test_status_and_reset() {
        let cb = breaker(2, Duration::from_secs(60));
        cb.record_failure(FailureType::RateLimit);
        let status = cb.status();
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.last_failure_type, Some(FailureType::RateLimit));
        assert!(status.last_failure_at.is_some());

        cb.record_failure(FailureType::RateLimit);
        assert!(cb.is_tripped());
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().last_failure_type, None);
    }

    #[test]
    fn test_registry_keys_are_independent() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        let anthropic = registry.get_or_create("anthropic");
        anthropic.record_failure(FailureType::ApiError);
        anthropic.record_failure(FailureType::ApiError);

        assert!(registry.get_or_create("anthropic").is_open());
        assert!(!registry.get_or_create("openai").is_open());
        assert!(Arc::ptr_eq(&anthropic, &registry.get_or_create("anthropic")));
        assert_eq!(registry.statuses().len(), 2);

        registry.reset_all();
        assert!(!anthropic.is_open());
    }

    #[test]
    fn test_registry_keeps_first_config() {
        let registry = CircuitBreakerRegistry::default();
        let custom = CircuitBreakerConfig {
            failure_threshold: 9,
            ..Default::default()
        };
        let first = registry.get_or_create_with("agent", &custom);
        let second = registry.get_or_create("agent");
        assert_eq!(first.config().failure_threshold, 9);
        assert_eq!(second.config().failure_threshold, 9);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        let cb = Arc::new(breaker(3, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    let _ = cb.is_open();
                    cb.record_failure(FailureType::ApiError)
                })
            })
            .collect();
        let transitions = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|opened| *opened)
            .count();

        assert_eq!(transitions, 1);
        assert_eq!(cb.status().consecutive_failures, 8);
        assert!(cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooling_ends_with_recovery_window() {
        let cb = breaker(2, Duration::from_secs(30));
        assert!(!cb.record_failure(FailureType::Timeout));
        assert!(cb.record_failure(FailureType::Timeout));
        assert!(cb.is_cooling());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!cb.is_cooling());
        // Reading the window never half-opens the circuit
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
