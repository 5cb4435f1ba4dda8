//! Fallback coordinator for many concurrent agents.
//!
//! The coordinator is the entry point for calling agents. For every call it:
//! 1. Serves the emergency fallback if most agents are unhealthy
//! 2. Serves the limited fallback if cascade prevention applies
//! 3. Otherwise delegates to the agent's handler and records the outcome
//!
//! The coordinator is constructed explicitly by the application and
//! shared through `Arc`; there is no global instance.

use bulwark_core::{
    AgentFallbackStatus, ErrorClassifier, FallbackError, FallbackResponseFactory,
    StructuredFallbackBuilder, StructuredSchema, SystemHealthLevel,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AgentConfig, ConfigError, CoordinatorConfig};
use crate::handler::{HandlerError, OperationFallbackHandler, Outcome};
use crate::health::HealthMonitor;
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry};

/// Errors surfaced by the coordinator.
///
/// Transient failures never appear here; they are recovered as fallbacks.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Agent '{0}' is not registered")]
    AgentNotRegistered(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Fallback configuration error: {0}")]
    Fallback(#[from] FallbackError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-agent slice of the status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthReport {
    pub health_score: f64,
    pub circuit_breaker_open: bool,
    pub fallback_active: bool,
    pub recent_failures: u32,
}

impl From<&AgentFallbackStatus> for AgentHealthReport {
    fn from(status: &AgentFallbackStatus) -> Self {
        Self {
            health_score: status.health_score,
            circuit_breaker_open: status.circuit_breaker_open,
            fallback_active: status.fallback_active,
            recent_failures: status.recent_failures,
        }
    }
}

/// System status for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusReport {
    pub system_health: SystemHealthLevel,
    pub agents_in_fallback: Vec<String>,
    pub total_agents: usize,
    pub cascade_prevention_active: bool,
    pub emergency_mode_active: bool,
    pub last_updated: DateTime<Utc>,
    pub per_agent: BTreeMap<String, AgentHealthReport>,
}

#[derive(Clone)]
struct AgentEntry {
    handler: Arc<OperationFallbackHandler>,
    breaker: Arc<CircuitBreaker>,
}

/// Coordinates fallbacks across registered agents.
pub struct FallbackCoordinator {
    config: CoordinatorConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    classifier: Arc<ErrorClassifier>,
    factory: Arc<FallbackResponseFactory>,
    health: HealthMonitor,
    agents: RwLock<BTreeMap<String, AgentEntry>>,
}

impl FallbackCoordinator {
    /// Create a coordinator from validated configuration.
    pub fn new(config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            breakers: Arc::new(CircuitBreakerRegistry::new(config.breaker_config())),
            classifier: Arc::new(ErrorClassifier::new()),
            factory: Arc::new(FallbackResponseFactory::new()),
            health: HealthMonitor::new(config.health.clone()),
            agents: RwLock::new(BTreeMap::new()),
            config,
        })
    }

    /// Use custom fallback templates for agents registered afterwards.
    pub fn with_factory(mut self, factory: FallbackResponseFactory) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Use a custom classifier for agents registered afterwards.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Register an agent. Idempotent: a second registration logs a warning
    /// and returns the existing handler unchanged.
    pub fn register_agent(
        &self,
        name: &str,
        config: Option<AgentConfig>,
    ) -> Result<Arc<OperationFallbackHandler>, CoordinatorError> {
        let mut agents = self.agents.write();
        if let Some(entry) = agents.get(name) {
            tracing::warn!(agent = name, "Agent already registered, keeping existing handler");
            return Ok(Arc::clone(&entry.handler));
        }

        let agent_config = config.unwrap_or_default();
        let breaker_config = agent_config
            .circuit_breaker
            .unwrap_or_else(|| self.config.breaker_config());
        breaker_config.validate()?;
        let policy = agent_config
            .retry
            .unwrap_or_else(|| self.config.retry.clone());
        policy.validate()?;

        let handler = Arc::new(
            OperationFallbackHandler::new(name, policy, Arc::clone(&self.breakers))
                .with_breaker_config(breaker_config)
                .with_factory(Arc::clone(&self.factory))
                .with_classifier(Arc::clone(&self.classifier)),
        );
        let breaker = handler.breaker(name);
        self.health.register(name);

        agents.insert(
            name.to_string(),
            AgentEntry {
                handler: Arc::clone(&handler),
                breaker,
            },
        );
        tracing::info!(agent = name, "Agent registered");

        Ok(handler)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<OperationFallbackHandler>> {
        self.agents.read().get(name).map(|e| Arc::clone(&e.handler))
    }

    /// Registered agent names, sorted.
    pub fn agents(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    /// Run an operation on behalf of an agent.
    ///
    /// Emergency mode and cascade prevention return synthetic values
    /// without touching the agent's handler. Otherwise the handler's
    /// outcome is recorded: a completed call counts as a success, a served
    /// fallback or an error as a failure. Errors are returned after
    /// recording.
    pub async fn execute_with_coordination<T, F, Fut>(
        &self,
        agent_name: &str,
        operation: F,
        operation_name: &str,
        fallback_category: &str,
    ) -> Result<Outcome<T>, CoordinatorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.refresh_circuit_flags();
        if self.health.is_emergency_mode_active() {
            tracing::error!(
                agent = agent_name,
                operation = operation_name,
                "Emergency mode active, serving system-wide fallback"
            );
            return Ok(Outcome::Fallback(
                self.factory.emergency_response(fallback_category),
            ));
        }

        if self.health.should_prevent_cascade(agent_name) {
            tracing::warn!(
                agent = agent_name,
                operation = operation_name,
                "Cascade prevention active, serving limited fallback"
            );
            return Ok(Outcome::Fallback(
                self.factory.limited_response(fallback_category),
            ));
        }

        let entry = self.entry(agent_name)?;
        let result = entry
            .handler
            .execute_with_fallback(operation, operation_name, agent_name, fallback_category)
            .await;

        self.record(agent_name, &entry, result.as_ref().map(Outcome::is_fallback));
        result.map_err(CoordinatorError::from)
    }

    /// Typed variant of [`execute_with_coordination`](Self::execute_with_coordination).
    ///
    /// Short-circuits build `T` from its schema, so callers always receive
    /// a schema-valid value.
    pub async fn execute_structured_with_coordination<T, F, Fut>(
        &self,
        agent_name: &str,
        operation: F,
        operation_name: &str,
    ) -> Result<Outcome<T, T>, CoordinatorError>
    where
        T: StructuredSchema,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<JsonValue>>,
    {
        self.refresh_circuit_flags();
        let emergency = self.health.is_emergency_mode_active();
        if emergency || self.health.should_prevent_cascade(agent_name) {
            tracing::warn!(
                agent = agent_name,
                operation = operation_name,
                emergency,
                schema = T::schema_name(),
                "System-level short-circuit, serving structured fallback"
            );
            let fallback = StructuredFallbackBuilder::<T>::shared()?.build()?;
            return Ok(Outcome::Fallback(fallback));
        }

        let entry = self.entry(agent_name)?;
        let result = entry
            .handler
            .execute_structured_with_fallback::<T, F, Fut>(operation, operation_name, agent_name)
            .await;

        self.record(agent_name, &entry, result.as_ref().map(Outcome::is_fallback));
        result.map_err(CoordinatorError::from)
    }

    fn entry(&self, agent_name: &str) -> Result<AgentEntry, CoordinatorError> {
        self.agents
            .read()
            .get(agent_name)
            .cloned()
            .ok_or_else(|| CoordinatorError::AgentNotRegistered(agent_name.to_string()))
    }

    /// Sync each agent's circuit flag with its breaker's recovery window.
    fn refresh_circuit_flags(&self) {
        for (name, entry) in self.agents.read().iter() {
            self.health
                .set_circuit_breaker_open(name, entry.breaker.is_cooling());
        }
    }

    fn record<E>(&self, agent_name: &str, entry: &AgentEntry, served_fallback: Result<bool, E>) {
        let breaker_open = entry.breaker.is_cooling();
        match served_fallback {
            Ok(false) => self.health.record_success(agent_name, breaker_open),
            Ok(true) | Err(_) => {
                self.health.record_failure(agent_name, breaker_open);
                self.health.update_system_health();
            }
        }
    }

    /// Current system status, with circuit flags refreshed.
    pub fn system_status(&self) -> SystemStatusReport {
        self.refresh_circuit_flags();

        let status = self.health.current_status();
        let per_agent = self
            .health
            .agent_statuses()
            .iter()
            .map(|(name, s)| (name.clone(), AgentHealthReport::from(s)))
            .collect();

        SystemStatusReport {
            system_health: status.health_level,
            agents_in_fallback: status.agents_in_fallback,
            total_agents: status.total_agents,
            cascade_prevention_active: status.cascade_prevention_active,
            emergency_mode_active: status.emergency_mode_active,
            last_updated: status.last_health_check,
            per_agent,
        }
    }

    /// Return an agent to zero-state: healthy score, closed breakers, empty history.
    pub fn reset_agent_status(&self, name: &str) -> Result<(), CoordinatorError> {
        let entry = self.entry(name)?;
        entry.handler.reset();
        entry.breaker.reset();
        self.health.reset_agent(name);
        tracing::info!(agent = name, "Agent status reset");
        Ok(())
    }

    /// Reset every agent and breaker; registrations are kept.
    pub fn reset_system_status(&self) {
        for entry in self.agents.read().values() {
            entry.handler.reset();
        }
        self.breakers.reset_all();
        self.health.reset_all();
        tracing::info!("System fallback status reset");
    }
}

impl std::fmt::Debug for FallbackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCoordinator")
            .field("agents", &self.agents())
            .field("config", &self.config)
            .finish()
    }
}
