//! # bulwark-runtime
//!
//! Stateful resilience for systems that call many unreliable operations
//! concurrently on behalf of named agents.
//!
//! This crate provides:
//! - Per-provider circuit breakers shared across agents
//! - Retry with failure-classified exponential backoff and jitter
//! - Per-agent fallback handlers that always return a usable value
//! - A system health monitor with emergency mode and cascade prevention
//! - A coordinator that ties the above together
//!
//! ## Key Guarantees
//!
//! 1. **No transient failure escapes**: exhausted retries and open circuits
//!    return fallbacks, only cancellation and configuration errors propagate
//! 2. **Bounded memory**: retry and health histories are capped
//! 3. **Injected state**: nothing is global, every test builds its own coordinator
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulwark_runtime::{CoordinatorConfig, FallbackCoordinator, Outcome};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let coordinator = FallbackCoordinator::new(CoordinatorConfig::default())?;
//! coordinator.register_agent("triage", None)?;
//!
//! let outcome = coordinator
//!     .execute_with_coordination(
//!         "triage",
//!         || async { Ok("billing") },
//!         "classify_ticket",
//!         "triage",
//!     )
//!     .await?;
//!
//! match outcome {
//!     Outcome::Completed(label) => println!("classified as {label}"),
//!     Outcome::Fallback(response) => println!("fallback: {:?}", response),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod handler;
pub mod health;
pub mod resilience;

// Re-export main types
pub use config::{AgentConfig, ConfigError, CoordinatorConfig};
pub use coordinator::{AgentHealthReport, CoordinatorError, FallbackCoordinator, SystemStatusReport};
pub use handler::{HandlerError, HandlerHealthStatus, OperationFallbackHandler, Outcome};
pub use health::{HealthConfig, HealthMonitor};
pub use resilience::{
    BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    RetryAttempt, RetryExecutor, RetryHistory, RetryOutcome, RetryPolicy,
};

// Core types callers need alongside the runtime
pub use bulwark_core::{
    ErrorClassifier, FailureType, FallbackResponse, FallbackResponseFactory, OperationError,
    StructuredSchema,
};
