//! Error classification.
//!
//! Maps an arbitrary error (and its source chain) to a [`FailureType`].
//! Typed signals win over message patterns; message patterns are tried
//! in a fixed order and the first match wins:
//!
//! | Order | Failure type |
//! |-------|--------------|
//! | 1 | Timeout |
//! | 2 | RateLimit |
//! | 3 | AuthenticationError |
//! | 4 | NetworkError |
//! | 5 | ValidationError |
//! | 6 | ApiError |
//!
//! Anything else is `Unknown`.

use lazy_static::lazy_static;
use regex::Regex;
use std::error::Error as StdError;
use std::io;

use crate::failure::{FailureType, OperationError};

lazy_static! {
    static ref DEFAULT_RULES: Vec<ClassificationRule> = vec![
        ClassificationRule::new(
            "timeout",
            FailureType::Timeout,
            Regex::new(r"(?i)(timed?[\s_-]?out|deadline (has )?(elapsed|exceeded))").unwrap(),
        ),
        ClassificationRule::new(
            "rate limit",
            FailureType::RateLimit,
            Regex::new(r"(?i)(\b429\b|rate[\s_-]?limit|too many requests|quota exceeded|throttl)").unwrap(),
        ),
        ClassificationRule::new(
            "authentication",
            FailureType::AuthenticationError,
            Regex::new(r"(?i)(\b40[13]\b|unauthori[sz]ed|forbidden|invalid api key|authenticat|permission denied|credentials)").unwrap(),
        ),
        ClassificationRule::new(
            "network",
            FailureType::NetworkError,
            Regex::new(r"(?i)(connection|network|\bdns\b|unreachable|socket|reset by peer|broken pipe|refused)").unwrap(),
        ),
        ClassificationRule::new(
            "validation",
            FailureType::ValidationError,
            Regex::new(r"(?i)(validat|invalid|malformed|schema|pars(e|ing)|missing field|unexpected (token|character))").unwrap(),
        ),
        ClassificationRule::new(
            "api",
            FailureType::ApiError,
            Regex::new(r"(?i)(\b5\d\d\b|api error|internal server error|service unavailable|bad gateway|server error|status code)").unwrap(),
        ),
    ];
}

/// A single (pattern, failure type) pair.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    /// Rule name, for logs
    pub name: &'static str,

    /// Failure type assigned on match
    pub failure_type: FailureType,

    pattern: Regex,
}

impl ClassificationRule {
    /// Create a rule from a compiled pattern.
    pub fn new(name: &'static str, failure_type: FailureType, pattern: Regex) -> Self {
        Self {
            name,
            failure_type,
            pattern,
        }
    }

    /// Whether the rule matches an error message.
    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

/// Immutable, ordered classifier.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl ErrorClassifier {
    /// Create a classifier with the default rule order.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Create a classifier with a custom rule order.
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Classify an error by walking its source chain.
    ///
    /// Never fails: unmatched errors are `Unknown`.
    pub fn classify(&self, error: &(dyn StdError + 'static)) -> FailureType {
        let chain: Vec<&(dyn StdError + 'static)> =
            std::iter::successors(Some(error), |e| (*e).source()).collect();

        if let Some(failure_type) = chain.iter().find_map(|e| typed_failure(*e)) {
            return failure_type;
        }

        let message = chain
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        self.classify_message(&message)
    }

    /// Classify a bare message using the pattern rules only.
    pub fn classify_message(&self, message: &str) -> FailureType {
        self.rules
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.failure_type)
            .unwrap_or(FailureType::Unknown)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn typed_failure(error: &(dyn StdError + 'static)) -> Option<FailureType> {
    if let Some(op) = error.downcast_ref::<OperationError>() {
        return op.failure_type();
    }

    if let Some(io_err) = error.downcast_ref::<io::Error>() {
        return match io_err.kind() {
            io::ErrorKind::TimedOut => Some(FailureType::Timeout),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable => Some(FailureType::NetworkError),
            io::ErrorKind::PermissionDenied => Some(FailureType::AuthenticationError),
            _ => None,
        };
    }

    if let Some(json_err) = error.downcast_ref::<serde_json::Error>() {
        if !json_err.is_io() {
            return Some(FailureType::ValidationError);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Plain(String);

    #[derive(Debug, thiserror::Error)]
    #[error("request to provider failed")]
    struct Wrapper(#[source] OperationError);

    fn classify_str(msg: &str) -> FailureType {
        ErrorClassifier::new().classify(&Plain(msg.to_string()))
    }

    #[test]
    fn test_message_patterns() {
        assert_eq!(classify_str("request timed out"), FailureType::Timeout);
        assert_eq!(classify_str("429 too many requests"), FailureType::RateLimit);
        assert_eq!(classify_str("Invalid API key"), FailureType::AuthenticationError);
        assert_eq!(classify_str("connection refused"), FailureType::NetworkError);
        assert_eq!(classify_str("malformed JSON body"), FailureType::ValidationError);
        assert_eq!(classify_str("502 bad gateway"), FailureType::ApiError);
        assert_eq!(classify_str("mysterious"), FailureType::Unknown);
    }

    #[test]
    fn test_typed_timeout() {
        let err = OperationError::Timeout(Duration::from_secs(1));
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::Timeout);
    }

    #[test]
    fn test_order_first_match_wins() {
        // Mentions both a timeout and a 503: timeout comes first.
        assert_eq!(
            classify_str("upstream timeout, returned 503"),
            FailureType::Timeout
        );
        // Rate limit beats validation wording.
        assert_eq!(
            classify_str("invalid request: rate limit reached"),
            FailureType::RateLimit
        );
    }

    #[test]
    fn test_typed_signal_beats_message() {
        let err = OperationError::Api {
            status: 500,
            message: "connection pool timeout".to_string(),
        };
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::ApiError);
    }

    #[test]
    fn test_source_chain_is_walked() {
        let err = Wrapper(OperationError::Network("dns lookup failed".to_string()));
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::NetworkError);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("agent call failed")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_nested_source_message_is_matched() {
        let err = Outer(io::Error::new(io::ErrorKind::Other, "429 too many requests"));
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::RateLimit);
    }

    #[test]
    fn test_io_errors() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "peer went away");
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::NetworkError);

        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(ErrorClassifier::new().classify(&err), FailureType::Timeout);
    }

    #[test]
    fn test_json_errors_are_validation() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(
            ErrorClassifier::new().classify(&err),
            FailureType::ValidationError
        );
    }

    #[test]
    fn test_cancelled_is_unknown() {
        assert_eq!(
            ErrorClassifier::new().classify(&OperationError::Cancelled),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_custom_rules() {
        let classifier = ErrorClassifier::with_rules(vec![ClassificationRule::new(
            "overloaded",
            FailureType::RateLimit,
            Regex::new(r"(?i)overloaded").unwrap(),
        )]);
        assert_eq!(
            classifier.classify_message("model overloaded"),
            FailureType::RateLimit
        );
        assert_eq!(classifier.classify_message("timed out"), FailureType::Unknown);
    }
}
