//! System-wide health monitoring.
//!
//! Aggregates per-agent fallback state into a health level and decides
//! the two system-wide short-circuits:
//! - **Emergency mode**: most agents are unhealthy (low score or open circuit)
//! - **Cascade prevention**: too many agents are already degraded, so a
//!   healthy agent is not allowed to start another retry storm
//!
//! All state sits behind one lock. Operations are short bookkeeping and
//! never await while holding it.

use bulwark_core::health::{MAX_HEALTH_SCORE, MIN_HEALTH_SCORE};
use bulwark_core::{AgentFallbackStatus, SystemFallbackStatus, SystemHealthLevel};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::config::ConfigError;

/// Health thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Unhealthy share of agents that activates emergency mode; also the
    /// fallback rate that marks the system as `Emergency`
    pub emergency_threshold: f64,

    /// Fallback-active agents at which cascade prevention starts
    pub max_concurrent_fallbacks: usize,

    /// Health score below which an agent counts as unhealthy
    pub unhealthy_score: f64,

    /// Fallback rate that marks the system as `Critical`
    pub critical_rate: f64,

    /// Fallback rate above which the system is `Degraded`
    pub degraded_rate: f64,

    pub success_reward: f64,

    pub failure_penalty: f64,

    /// Snapshots kept by `update_system_health`
    pub history_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            emergency_threshold: 0.7,
            max_concurrent_fallbacks: 3,
            unhealthy_score: 0.3,
            critical_rate: 0.5,
            degraded_rate: 0.2,
            success_reward: 0.1,
            failure_penalty: 0.2,
            history_capacity: 100,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratios = [
            ("health.emergency_threshold", self.emergency_threshold),
            ("health.unhealthy_score", self.unhealthy_score),
            ("health.critical_rate", self.critical_rate),
            ("health.degraded_rate", self.degraded_rate),
            ("health.success_reward", self.success_reward),
            ("health.failure_penalty", self.failure_penalty),
        ];
        for (name, value) in ratios {
            if !(MIN_HEALTH_SCORE..=MAX_HEALTH_SCORE).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(self.degraded_rate <= self.critical_rate && self.critical_rate <= self.emergency_threshold) {
            return Err(ConfigError::Invalid(
                "health rates must satisfy degraded_rate <= critical_rate <= emergency_threshold"
                    .to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "health.history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HealthState {
    agents: BTreeMap<String, AgentFallbackStatus>,
    history: VecDeque<SystemFallbackStatus>,
}

impl HealthState {
    fn agents_in_fallback(&self) -> Vec<String> {
        self.agents
            .values()
            .filter(|s| s.fallback_active)
            .map(|s| s.agent_name.clone())
            .collect()
    }

    fn fallback_count(&self) -> usize {
        self.agents.values().filter(|s| s.fallback_active).count()
    }

    fn emergency(&self, config: &HealthConfig) -> bool {
        let total = self.agents.len();
        if total == 0 {
            return false;
        }
        let unhealthy = self
            .agents
            .values()
            .filter(|s| s.is_unhealthy(config.unhealthy_score))
            .count();
        unhealthy as f64 / total as f64 >= config.emergency_threshold
    }

    fn cascade(&self, config: &HealthConfig) -> bool {
        self.fallback_count() >= config.max_concurrent_fallbacks
    }

    fn snapshot(&self, config: &HealthConfig) -> SystemFallbackStatus {
        let agents_in_fallback = self.agents_in_fallback();
        let total_agents = self.agents.len();
        let rate = if total_agents == 0 {
            0.0
        } else {
            agents_in_fallback.len() as f64 / total_agents as f64
        };

        SystemFallbackStatus {
            health_level: SystemHealthLevel::from_fallback_rate(
                rate,
                config.emergency_threshold,
                config.critical_rate,
                config.degraded_rate,
            ),
            agents_in_fallback,
            total_agents,
            cascade_prevention_active: self.cascade(config),
            emergency_mode_active: self.emergency(config),
            last_health_check: Utc::now(),
        }
    }
}

/// Tracks agent health and derives system posture.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start tracking an agent. Returns false if it was already tracked.
    pub fn register(&self, agent: &str) -> bool {
        let mut state = self.state.lock();
        if state.agents.contains_key(agent) {
            return false;
        }
        state
            .agents
            .insert(agent.to_string(), AgentFallbackStatus::new(agent));
        true
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.state.lock().agents.contains_key(agent)
    }

    /// Raise the agent's score and clear its fallback flag.
    pub fn record_success(&self, agent: &str, circuit_breaker_open: bool) {
        let mut state = self.state.lock();
        match state.agents.get_mut(agent) {
            Some(status) => {
                status.adjust_health(self.config.success_reward);
                status.fallback_active = false;
                status.circuit_breaker_open = circuit_breaker_open;
            }
            None => tracing::warn!(agent, "Success recorded for untracked agent"),
        }
    }

    /// Lower the agent's score and mark it as serving fallbacks.
    pub fn record_failure(&self, agent: &str, circuit_breaker_open: bool) {
        let mut state = self.state.lock();
        match state.agents.get_mut(agent) {
            Some(status) => {
                status.recent_failures = status.recent_failures.saturating_add(1);
                status.last_failure_time = Some(Utc::now());
                status.adjust_health(-self.config.failure_penalty);
                status.fallback_active = true;
                status.circuit_breaker_open = circuit_breaker_open;
                tracing::debug!(
                    agent,
                    health_score = status.health_score,
                    failures = status.recent_failures,
                    "Agent failure recorded"
                );
            }
            None => tracing::warn!(agent, "Failure recorded for untracked agent"),
        }
    }

    /// Sync an agent's circuit flag without touching its score.
    pub fn set_circuit_breaker_open(&self, agent: &str, open: bool) {
        if let Some(status) = self.state.lock().agents.get_mut(agent) {
            status.circuit_breaker_open = open;
        }
    }

    /// Whether the unhealthy share of agents reaches the emergency threshold.
    pub fn is_emergency_mode_active(&self) -> bool {
        self.state.lock().emergency(&self.config)
    }

    /// Whether `agent` should be refused to protect the rest of the system.
    ///
    /// An agent already in fallback is never blocked.
    pub fn should_prevent_cascade(&self, agent: &str) -> bool {
        let state = self.state.lock();
        let already_degraded = state
            .agents
            .get(agent)
            .map(|s| s.fallback_active)
            .unwrap_or(false);
        !already_degraded && state.cascade(&self.config)
    }

    /// Take a snapshot and append it to the bounded history.
    pub fn update_system_health(&self) -> SystemFallbackStatus {
        let mut state = self.state.lock();
        let snapshot = state.snapshot(&self.config);

        if snapshot.health_level >= SystemHealthLevel::Critical {
            tracing::warn!(
                level = %snapshot.health_level,
                in_fallback = snapshot.agents_in_fallback.len(),
                total = snapshot.total_agents,
                "System health degraded"
            );
        }

        state.history.push_back(snapshot.clone());
        while state.history.len() > self.config.history_capacity {
            state.history.pop_front();
        }
        snapshot
    }

    /// Snapshot without recording it.
    pub fn current_status(&self) -> SystemFallbackStatus {
        self.state.lock().snapshot(&self.config)
    }

    /// Copy of one agent's status.
    pub fn agent_status(&self, agent: &str) -> Option<AgentFallbackStatus> {
        self.state.lock().agents.get(agent).cloned()
    }

    pub fn agent_statuses(&self) -> BTreeMap<String, AgentFallbackStatus> {
        self.state.lock().agents.clone()
    }

    /// Recorded snapshots, oldest first.
    pub fn history(&self) -> Vec<SystemFallbackStatus> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Replace an agent's status with zero-state. Returns false if untracked.
    pub fn reset_agent(&self, agent: &str) -> bool {
        let mut state = self.state.lock();
        match state.agents.get_mut(agent) {
            Some(status) => {
                *status = AgentFallbackStatus::new(agent);
                true
            }
            None => false,
        }
    }

    /// Zero every agent and clear the history; agents stay tracked.
    pub fn reset_all(&self) {
        let mut state = self.state.lock();
        for (name, status) in state.agents.iter_mut() {
            *status = AgentFallbackStatus::new(name.as_str());
        }
        state.history.clear();
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(agents: usize) -> HealthMonitor {
        let monitor = HealthMonitor::default();
        for i in 0..agents {
            monitor.register(&format!("agent-{i}"));
        }
        monitor
    }

    #[test]
    fn test_success_and_failure_adjust_score() {
        let monitor = monitor_with(1);
        monitor.record_failure("agent-0", false);
        let status = monitor.agent_status("agent-0").unwrap();
        assert!((status.health_score - 0.8).abs() < 1e-9);
        assert!(status.fallback_active);
        assert_eq!(status.recent_failures, 1);
        assert!(status.last_failure_time.is_some());

        monitor.record_success("agent-0", false);
        let status = monitor.agent_status("agent-0").unwrap();
        assert!((status.health_score - 0.9).abs() < 1e-9);
        assert!(!status.fallback_active);
    }

    #[test]
    fn test_score_is_clamped() {
        let monitor = monitor_with(1);
        for _ in 0..10 {
            monitor.record_failure("agent-0", false);
        }
        assert_eq!(monitor.agent_status("agent-0").unwrap().health_score, 0.0);
        for _ in 0..20 {
            monitor.record_success("agent-0", false);
        }
        assert_eq!(monitor.agent_status("agent-0").unwrap().health_score, 1.0);
    }

    #[test]
    fn test_emergency_threshold_boundary() {
        let monitor = monitor_with(10);
        for i in 0..6 {
            monitor.record_failure(&format!("agent-{i}"), true);
        }
        assert!(!monitor.is_emergency_mode_active());

        monitor.record_failure("agent-6", true);
        assert!(monitor.is_emergency_mode_active());
    }

    #[test]
    fn test_emergency_counts_low_scores() {
        let monitor = monitor_with(3);
        // Four failures take a score from 1.0 to 0.2, below 0.3
        for agent in ["agent-0", "agent-1", "agent-2"] {
            for _ in 0..4 {
                monitor.record_failure(agent, false);
            }
        }
        assert!(monitor.is_emergency_mode_active());
    }

    #[test]
    fn test_emergency_inactive_without_agents() {
        assert!(!HealthMonitor::default().is_emergency_mode_active());
    }

    #[test]
    fn test_cascade_prevention_exempts_degraded_agent() {
        let monitor = monitor_with(5);
        for i in 0..3 {
            monitor.record_failure(&format!("agent-{i}"), false);
        }
        assert!(monitor.should_prevent_cascade("agent-3"));
        assert!(!monitor.should_prevent_cascade("agent-0"));

        monitor.record_success("agent-2", false);
        assert!(!monitor.should_prevent_cascade("agent-3"));
    }

    #[test]
    fn test_system_health_levels_and_history() {
        let monitor = monitor_with(10);
        assert_eq!(
            monitor.update_system_health().health_level,
            SystemHealthLevel::Healthy
        );

        for i in 0..3 {
            monitor.record_failure(&format!("agent-{i}"), false);
        }
        let snapshot = monitor.update_system_health();
        assert_eq!(snapshot.health_level, SystemHealthLevel::Degraded);
        assert!(snapshot.cascade_prevention_active);
        assert_eq!(snapshot.agents_in_fallback.len(), 3);

        for i in 3..5 {
            monitor.record_failure(&format!("agent-{i}"), false);
        }
        assert_eq!(
            monitor.update_system_health().health_level,
            SystemHealthLevel::Critical
        );

        for i in 5..7 {
            monitor.record_failure(&format!("agent-{i}"), false);
        }
        assert_eq!(
            monitor.update_system_health().health_level,
            SystemHealthLevel::Emergency
        );
        assert_eq!(monitor.history().len(), 4);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = monitor_with(1);
        for _ in 0..150 {
            monitor.update_system_health();
        }
        assert_eq!(monitor.history().len(), 100);
    }

    #[test]
    fn test_reset_agent_then_success_is_fully_healthy() {
        let monitor = monitor_with(2);
        for _ in 0..3 {
            monitor.record_failure("agent-0", true);
        }
        assert!(monitor.reset_agent("agent-0"));
        monitor.record_success("agent-0", false);

        let status = monitor.agent_status("agent-0").unwrap();
        assert_eq!(status.health_score, 1.0);
        assert!(!status.fallback_active);
        assert_eq!(status.recent_failures, 0);
        assert!(!monitor.reset_agent("missing"));
    }

    #[test]
    fn test_reset_all_keeps_agents() {
        let monitor = monitor_with(3);
        monitor.record_failure("agent-1", true);
        monitor.update_system_health();
        monitor.reset_all();

        assert_eq!(monitor.agent_statuses().len(), 3);
        assert!(monitor.history().is_empty());
        assert!(!monitor.agent_status("agent-1").unwrap().fallback_active);
    }

    #[test]
    fn test_config_validation() {
        assert!(HealthConfig::default().validate().is_ok());
        let bad = HealthConfig {
            critical_rate: 0.9,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
