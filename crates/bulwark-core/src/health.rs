//! Health data types shared by the monitor and status reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest possible health score.
pub const MIN_HEALTH_SCORE: f64 = 0.0;

/// Highest possible health score; new agents start here.
pub const MAX_HEALTH_SCORE: f64 = 1.0;

/// Per-agent fallback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFallbackStatus {
    /// Agent name
    pub agent_name: String,

    /// Last observed state of the agent's circuit
    pub circuit_breaker_open: bool,

    /// Failures recorded since registration or reset
    pub recent_failures: u32,

    /// Whether the agent's last call was served by a fallback
    pub fallback_active: bool,

    /// When the last failure was recorded
    pub last_failure_time: Option<DateTime<Utc>>,

    /// Reputation in [0, 1]
    pub health_score: f64,
}

impl AgentFallbackStatus {
    /// Fresh zero-state status.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            circuit_breaker_open: false,
            recent_failures: 0,
            fallback_active: false,
            last_failure_time: None,
            health_score: MAX_HEALTH_SCORE,
        }
    }

    /// Adjust the health score, clamped to [0, 1].
    pub fn adjust_health(&mut self, delta: f64) {
        self.health_score = (self.health_score + delta).clamp(MIN_HEALTH_SCORE, MAX_HEALTH_SCORE);
    }

    /// Whether the agent counts towards emergency mode.
    pub fn is_unhealthy(&self, unhealthy_score: f64) -> bool {
        self.health_score < unhealthy_score || self.circuit_breaker_open
    }
}

/// System-wide health, derived from the share of agents in fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealthLevel {
    Healthy,
    Degraded,
    Critical,
    Emergency,
}

impl SystemHealthLevel {
    /// Derive the level from a fallback rate.
    ///
    /// `emergency` and `critical` are inclusive lower bounds, `degraded` is
    /// exclusive.
    pub fn from_fallback_rate(rate: f64, emergency: f64, critical: f64, degraded: f64) -> Self {
        if rate >= emergency {
            SystemHealthLevel::Emergency
        } else if rate >= critical {
            SystemHealthLevel::Critical
        } else if rate > degraded {
            SystemHealthLevel::Degraded
        } else {
            SystemHealthLevel::Healthy
        }
    }
}

impl fmt::Display for SystemHealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemHealthLevel::Healthy => "healthy",
            SystemHealthLevel::Degraded => "degraded",
            SystemHealthLevel::Critical => "critical",
            SystemHealthLevel::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Point-in-time system snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFallbackStatus {
    pub health_level: SystemHealthLevel,
    pub agents_in_fallback: Vec<String>,
    pub total_agents: usize,
    pub cascade_prevention_active: bool,
    pub emergency_mode_active: bool,
    pub last_health_check: DateTime<Utc>,
}
