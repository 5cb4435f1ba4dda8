//! Per-agent fallback handler.
//!
//! Composes the circuit breaker for a provider, the retry loop and the
//! fallback factory:
//!
//! 1. Circuit open: return the circuit-breaker fallback, no attempt made
//! 2. Otherwise retry with classified backoff
//! 3. Retries exhausted: return the category fallback carrying the last error
//!
//! Cancellation and schema configuration errors are returned as errors;
//! every other failure is recovered locally.

use bulwark_core::{
    ErrorClassifier, FailureType, FallbackError, FallbackResponse, FallbackResponseFactory,
    StructuredFallbackBuilder, StructuredSchema,
};
use chrono::Duration as ChronoDuration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::resilience::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, RetryAttempt,
    RetryExecutor, RetryHistory, RetryOutcome, RetryPolicy,
};

/// Window used for `recent_failures` in health status.
const RECENT_FAILURE_WINDOW_MINUTES: i64 = 5;

/// Errors a handler surfaces instead of recovering.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Operation '{operation}' was cancelled")]
    Cancelled {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Fallback configuration error: {0}")]
    Fallback(#[from] FallbackError),
}

/// What a guarded call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, F = FallbackResponse> {
    /// The real operation succeeded
    Completed(T),

    /// A substitute was served
    Fallback(F),
}

impl<T, F> Outcome<T, F> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Outcome::Fallback(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Fallback(_) => None,
        }
    }

    pub fn fallback(self) -> Option<F> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Fallback(fallback) => Some(fallback),
        }
    }
}

impl<T> Outcome<T, T> {
    /// The value, whether real or substituted.
    pub fn into_value(self) -> T {
        match self {
            Outcome::Completed(value) | Outcome::Fallback(value) => value,
        }
    }
}

/// Operator view of one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerHealthStatus {
    pub handler: String,

    /// Failed attempts ever recorded
    pub total_retries: u64,

    /// Failed attempts in the trailing five minutes
    pub recent_failures: usize,

    /// Breakers of the providers this handler has called
    pub circuit_breakers: BTreeMap<String, BreakerStatus>,

    pub failure_breakdown: BTreeMap<FailureType, usize>,
}

/// Guards calls for one agent.
pub struct OperationFallbackHandler {
    name: String,
    breakers: Arc<CircuitBreakerRegistry>,
    breaker_config: CircuitBreakerConfig,
    executor: RetryExecutor,
    history: Arc<RetryHistory>,
    factory: Arc<FallbackResponseFactory>,
    providers: RwLock<BTreeSet<String>>,
}

impl OperationFallbackHandler {
    /// Create a handler that shares `breakers` with other handlers.
    pub fn new(
        name: impl Into<String>,
        policy: RetryPolicy,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let history = Arc::new(RetryHistory::new());
        let breaker_config = breakers.default_config().clone();
        Self {
            name: name.into(),
            breakers,
            breaker_config,
            executor: RetryExecutor::new(
                policy,
                Arc::new(ErrorClassifier::new()),
                Arc::clone(&history),
            ),
            history,
            factory: Arc::new(FallbackResponseFactory::new()),
            providers: RwLock::new(BTreeSet::new()),
        }
    }

    /// Breaker config for provider keys this handler creates.
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn with_factory(mut self, factory: Arc<FallbackResponseFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.executor = RetryExecutor::new(
            self.executor.policy().clone(),
            classifier,
            Arc::clone(&self.history),
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    /// The breaker for a provider key, created on first use.
    pub fn breaker(&self, provider_key: &str) -> Arc<CircuitBreaker> {
        if !self.providers.read().contains(provider_key) {
            self.providers.write().insert(provider_key.to_string());
        }
        self.breakers
            .get_or_create_with(provider_key, &self.breaker_config)
    }

    /// Run an operation, substituting a category fallback on failure.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        provider_key: &str,
        fallback_category: &str,
    ) -> Result<Outcome<T>, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let breaker = self.breaker(provider_key);
        if breaker.is_open() {
            tracing::warn!(
                handler = %self.name,
                operation = operation_name,
                provider = provider_key,
                "Circuit open, serving fallback without attempting the call"
            );
            return Ok(Outcome::Fallback(
                self.factory
                    .circuit_breaker_response(fallback_category, provider_key),
            ));
        }

        match self.executor.execute(&breaker, operation_name, operation).await {
            RetryOutcome::Success(value) => Ok(Outcome::Completed(value)),
            RetryOutcome::Exhausted {
                last_error,
                attempts,
                ..
            } => {
                tracing::warn!(
                    handler = %self.name,
                    operation = operation_name,
                    provider = provider_key,
                    attempts,
                    category = fallback_category,
                    "Serving fallback after exhausted retries"
                );
                let error = format!("{last_error:#}");
                Ok(Outcome::Fallback(
                    self.factory.create_response(fallback_category, Some(&error)),
                ))
            }
            RetryOutcome::Cancelled(source) => Err(HandlerError::Cancelled {
                operation: operation_name.to_string(),
                source,
            }),
        }
    }

    /// Run an operation producing raw JSON and always return a schema-valid `T`.
    ///
    /// Output that fails validation is replaced by a built fallback. A schema
    /// that cannot produce a fallback is a configuration error.
    pub async fn execute_structured_with_fallback<T, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        provider_key: &str,
    ) -> Result<Outcome<T, T>, HandlerError>
    where
        T: StructuredSchema,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<JsonValue>>,
    {
        let builder = StructuredFallbackBuilder::<T>::shared()?;

        let breaker = self.breaker(provider_key);
        if breaker.is_open() {
            tracing::warn!(
                handler = %self.name,
                operation = operation_name,
                provider = provider_key,
                schema = T::schema_name(),
                "Circuit open, serving structured fallback"
            );
            return Ok(Outcome::Fallback(builder.build()?));
        }

        match self.executor.execute(&breaker, operation_name, operation).await {
            RetryOutcome::Success(value) => match builder.validate(&value) {
                Ok(typed) => Ok(Outcome::Completed(typed)),
                Err(mismatch) => {
                    tracing::warn!(
                        handler = %self.name,
                        operation = operation_name,
                        error = %mismatch,
                        "Operation output failed schema validation, serving fallback"
                    );
                    Ok(Outcome::Fallback(builder.build()?))
                }
            },
            RetryOutcome::Exhausted { attempts, .. } => {
                tracing::warn!(
                    handler = %self.name,
                    operation = operation_name,
                    provider = provider_key,
                    attempts,
                    schema = T::schema_name(),
                    "Serving structured fallback after exhausted retries"
                );
                Ok(Outcome::Fallback(builder.build()?))
            }
            RetryOutcome::Cancelled(source) => Err(HandlerError::Cancelled {
                operation: operation_name.to_string(),
                source,
            }),
        }
    }

    /// Retry counts, failure breakdown and breaker states for this handler.
    pub fn health_status(&self) -> HandlerHealthStatus {
        let circuit_breakers = self
            .providers
            .read()
            .iter()
            .filter_map(|key| self.breakers.get(key).map(|b| (key.clone(), b.status())))
            .collect();

        HandlerHealthStatus {
            handler: self.name.clone(),
            total_retries: self.history.total_recorded(),
            recent_failures: self
                .history
                .recent(ChronoDuration::minutes(RECENT_FAILURE_WINDOW_MINUTES)),
            circuit_breakers,
            failure_breakdown: self.history.breakdown(),
        }
    }

    /// Copy of the bounded failed-attempt history.
    pub fn retry_history(&self) -> Vec<RetryAttempt> {
        self.history.snapshot()
    }

    /// Provider keys this handler has called.
    pub fn providers(&self) -> Vec<String> {
        self.providers.read().iter().cloned().collect()
    }

    /// Clear history and close this handler's breakers.
    pub fn reset(&self) {
        self.history.clear();
        for key in self.providers.read().iter() {
            if let Some(breaker) = self.breakers.get(key) {
                breaker.reset();
            }
        }
    }
}

impl std::fmt::Debug for OperationFallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationFallbackHandler")
            .field("name", &self.name)
            .field("policy", self.executor.policy())
            .field("providers", &self.providers())
            .finish()
    }
}
