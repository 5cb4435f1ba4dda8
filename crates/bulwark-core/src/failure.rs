//! Failure taxonomy for downstream operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classified kind of a failed downstream call.
///
/// Drives backoff scaling in the retry loop and the failure breakdown
/// reported by handler health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    RateLimit,
    ApiError,
    ValidationError,
    NetworkError,
    AuthenticationError,
    Unknown,
}

impl FailureType {
    /// Stable lowercase name, used in logs and status maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Timeout => "timeout",
            FailureType::RateLimit => "rate_limit",
            FailureType::ApiError => "api_error",
            FailureType::ValidationError => "validation_error",
            FailureType::NetworkError => "network_error",
            FailureType::AuthenticationError => "authentication_error",
            FailureType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure signals a downstream client can raise.
///
/// Operations return `anyhow::Error`; wrapping one of these variants gives
/// the classifier an exact answer instead of a message-pattern guess.
#[derive(Error, Debug, Clone)]
pub enum OperationError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller abandoned the operation; never retried.
    #[error("Operation cancelled")]
    Cancelled,
}

impl OperationError {
    /// The failure type this signal maps to, if it is a classifiable failure.
    ///
    /// `Cancelled` is not a failure and returns `None`.
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            OperationError::Timeout(_) => Some(FailureType::Timeout),
            OperationError::RateLimited { .. } => Some(FailureType::RateLimit),
            OperationError::Api { status: 401 | 403, .. } => {
                Some(FailureType::AuthenticationError)
            }
            OperationError::Api { status: 429, .. } => Some(FailureType::RateLimit),
            OperationError::Api { status: 408, .. } => Some(FailureType::Timeout),
            OperationError::Api { .. } => Some(FailureType::ApiError),
            OperationError::Validation(_) => Some(FailureType::ValidationError),
            OperationError::Network(_) => Some(FailureType::NetworkError),
            OperationError::Authentication(_) => Some(FailureType::AuthenticationError),
            OperationError::Cancelled => None,
        }
    }

    /// Whether this signal is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_status_mapping() {
        let auth = OperationError::Api {
            status: 401,
            message: "nope".to_string(),
        };
        assert_eq!(auth.failure_type(), Some(FailureType::AuthenticationError));

        let throttled = OperationError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(throttled.failure_type(), Some(FailureType::RateLimit));

        let server = OperationError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(server.failure_type(), Some(FailureType::ApiError));
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(OperationError::Cancelled.is_cancelled());
        assert_eq!(OperationError::Cancelled.failure_type(), None);
    }

    #[test]
    fn test_failure_type_serializes_snake_case() {
        let json = serde_json::to_string(&FailureType::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        assert_eq!(FailureType::NetworkError.to_string(), "network_error");
    }
}
