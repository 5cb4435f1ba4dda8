//! Coordinator configuration.
//!
//! Thresholds and timeouts are injected by the embedding application,
//! either constructed in code or loaded from YAML:
//!
//! ```yaml
//! test_mode: false
//! circuit_breaker:
//!   failure_threshold: 3
//!   recovery_timeout: 60s
//! retry:
//!   max_retries: 3
//!   per_attempt_timeout: 30s
//!   base_delay: 1s
//!   max_delay: 1m
//!   exponential_base: 2.0
//! health:
//!   emergency_threshold: 0.7
//!   max_concurrent_fallbacks: 3
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::health::HealthConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for a `FallbackCoordinator`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Use shorter breaker thresholds when no breaker config is given
    #[serde(default)]
    pub test_mode: bool,

    /// Explicit breaker settings; overrides the test-mode preset
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Default retry policy for every agent
    #[serde(default)]
    pub retry: RetryPolicy,

    /// System health thresholds
    #[serde(default)]
    pub health: HealthConfig,
}

impl CoordinatorConfig {
    /// Preset for tests: test-mode breakers and millisecond backoff.
    pub fn test() -> Self {
        Self {
            test_mode: true,
            circuit_breaker: None,
            retry: RetryPolicy {
                max_retries: 2,
                per_attempt_timeout: Duration::from_secs(1),
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                exponential_base: 2.0,
            },
            health: HealthConfig::default(),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Breaker settings in effect, honoring test mode.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        match &self.circuit_breaker {
            Some(config) => config.clone(),
            None if self.test_mode => CircuitBreakerConfig::test_mode(),
            None => CircuitBreakerConfig::default(),
        }
    }

    /// Check ranges and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker_config().validate()?;
        self.retry.validate()?;
        self.health.validate()?;
        Ok(())
    }
}

/// Per-agent overrides applied at registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl AgentConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }
}

/// Serde adapter for human-readable durations ("250ms", "1m 30s").
pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.health.max_concurrent_fallbacks, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_mode_lowers_breaker_thresholds() {
        let config = CoordinatorConfig {
            test_mode: true,
            ..Default::default()
        };
        let breaker = config.breaker_config();
        assert!(breaker.failure_threshold < CircuitBreakerConfig::default().failure_threshold);
        assert!(breaker.recovery_timeout < CircuitBreakerConfig::default().recovery_timeout);
    }

    #[test]
    fn test_explicit_breaker_wins_over_test_mode() {
        let config = CoordinatorConfig {
            test_mode: true,
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(10),
            }),
            ..Default::default()
        };
        assert_eq!(config.breaker_config().failure_threshold, 5);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
test_mode: false
circuit_breaker:
  failure_threshold: 4
  recovery_timeout: 90s
retry:
  max_retries: 5
  per_attempt_timeout: 10s
  base_delay: 500ms
  max_delay: 1m
  exponential_base: 3.0
health:
  emergency_threshold: 0.8
  max_concurrent_fallbacks: 2
"#;
        let config = CoordinatorConfig::from_yaml(yaml).unwrap();
        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_threshold, 4);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.health.max_concurrent_fallbacks, 2);
        // Unspecified health fields keep their defaults
        assert_eq!(config.health.unhealthy_score, 0.3);
    }

    #[test]
    fn test_from_yaml_rejects_bad_ranges() {
        let yaml = r#"
health:
  emergency_threshold: 1.5
"#;
        assert!(matches!(
            CoordinatorConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_yaml_rejects_bad_duration() {
        let yaml = r#"
retry:
  base_delay: soon
"#;
        assert!(matches!(
            CoordinatorConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_round_trips_through_yaml() {
        let config = CoordinatorConfig::test();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = CoordinatorConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.retry.base_delay, Duration::from_millis(10));
        assert!(parsed.test_mode);
    }
}
