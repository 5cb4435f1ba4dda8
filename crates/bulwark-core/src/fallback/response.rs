//! The fallback response sum type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A synthetic substitute for an operation's real output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum FallbackResponse {
    /// Plain text, for free-form callers
    Text(String),

    /// Structured body, for callers expecting a JSON object
    Structured(Map<String, Value>),
}

impl FallbackResponse {
    /// Build a structured response from a JSON value.
    ///
    /// Non-object values are wrapped under a `value` key.
    pub fn structured(value: Value) -> Self {
        match value {
            Value::Object(map) => FallbackResponse::Structured(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                FallbackResponse::Structured(map)
            }
        }
    }

    /// Build a text response.
    pub fn text(content: impl Into<String>) -> Self {
        FallbackResponse::Text(content.into())
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, FallbackResponse::Structured(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FallbackResponse::Text(text) => Some(text),
            FallbackResponse::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            FallbackResponse::Structured(map) => Some(map),
            FallbackResponse::Text(_) => None,
        }
    }

    pub fn as_structured_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            FallbackResponse::Structured(map) => Some(map),
            FallbackResponse::Text(_) => None,
        }
    }

    /// Look up a top-level field of a structured response.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_structured().and_then(|map| map.get(field))
    }

    /// Confidence reported by the response, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.get("confidence").and_then(Value::as_f64)
    }

    /// Whether the response was produced because a circuit was open.
    pub fn circuit_breaker_triggered(&self) -> bool {
        self.flag("circuit_breaker_triggered")
    }

    /// Whether the response was produced by the emergency short-circuit.
    pub fn emergency_mode(&self) -> bool {
        self.flag("emergency_mode")
    }

    /// Whether the response was produced by cascade prevention.
    pub fn limited_service(&self) -> bool {
        self.flag("limited_service")
    }

    fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            FallbackResponse::Text(text) => Value::String(text),
            FallbackResponse::Structured(map) => Value::Object(map),
        }
    }
}
