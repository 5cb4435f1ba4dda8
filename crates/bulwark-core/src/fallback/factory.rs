//! Category templates for fallback responses.
//!
//! Each call returns an independent copy of the template; callers may
//! mutate what they receive without affecting later responses.

use chrono::Utc;
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::FallbackResponse;

/// Category used when none matches.
pub const GENERAL_CATEGORY: &str = "general";

/// Confidence reported by circuit-open fallbacks.
pub const CIRCUIT_OPEN_CONFIDENCE: f64 = 0.1;

/// Confidence reported by emergency fallbacks.
pub const EMERGENCY_CONFIDENCE: f64 = 0.0;

/// Confidence reported by cascade-prevention fallbacks.
pub const LIMITED_CONFIDENCE: f64 = 0.2;

lazy_static! {
    static ref DEFAULT_TEMPLATES: BTreeMap<String, FallbackResponse> = {
        let mut templates = BTreeMap::new();
        templates.insert(
            "triage".to_string(),
            FallbackResponse::structured(json!({
                "category": "unclassified",
                "priority": "medium",
                "confidence": 0.3,
                "reasoning": "Automated triage is temporarily unavailable; default classification applied",
                "requires_human_review": true,
                "fallback_used": true
            })),
        );
        templates.insert(
            "data_analysis".to_string(),
            FallbackResponse::structured(json!({
                "insights": ["Analysis is temporarily unavailable"],
                "recommendations": ["Retry the analysis once the service recovers"],
                "confidence": 0.2,
                "analysis_complete": false,
                "fallback_used": true
            })),
        );
        templates.insert(
            "action_plan".to_string(),
            FallbackResponse::structured(json!({
                "steps": [],
                "status": "deferred",
                "summary": "Plan generation is temporarily unavailable; no actions were scheduled",
                "confidence": 0.1,
                "requires_human_review": true,
                "fallback_used": true
            })),
        );
        templates.insert(
            "config_validation".to_string(),
            FallbackResponse::structured(json!({
                "valid": false,
                "issues": ["Validation could not be completed; treat configuration as unverified"],
                "confidence": 0.0,
                "fallback_used": true
            })),
        );
        templates.insert(
            GENERAL_CATEGORY.to_string(),
            FallbackResponse::text(
                "The service is temporarily unavailable. Please try again shortly.",
            ),
        );
        templates
    };
}

/// Produces fallback responses by category.
#[derive(Debug, Clone)]
pub struct FallbackResponseFactory {
    templates: BTreeMap<String, FallbackResponse>,
}

impl FallbackResponseFactory {
    /// Create a factory with the built-in templates.
    pub fn new() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES.clone(),
        }
    }

    /// Register or replace a template.
    pub fn with_template(mut self, category: impl Into<String>, template: FallbackResponse) -> Self {
        self.templates.insert(category.into(), template);
        self
    }

    /// Known categories.
    pub fn categories(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    /// Create a fallback response for a category.
    ///
    /// Unknown categories use the general template. When `error` is given
    /// and the template is structured, `fallback_metadata` records the error
    /// and a timestamp.
    pub fn create_response(&self, category: &str, error: Option<&str>) -> FallbackResponse {
        let mut response = self.template(category);

        if let (Some(error), Some(map)) = (error, response.as_structured_mut()) {
            map.insert(
                "fallback_metadata".to_string(),
                json!({
                    "error": error,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }

        response
    }

    /// Fallback served when the provider's circuit is open.
    pub fn circuit_breaker_response(&self, category: &str, provider: &str) -> FallbackResponse {
        let mut map = self.structured_template(category);
        map.insert("circuit_breaker_triggered".to_string(), Value::Bool(true));
        map.insert("confidence".to_string(), json!(CIRCUIT_OPEN_CONFIDENCE));
        map.insert("provider".to_string(), Value::String(provider.to_string()));
        FallbackResponse::Structured(map)
    }

    /// System-wide fallback served while emergency mode is active.
    pub fn emergency_response(&self, category: &str) -> FallbackResponse {
        let mut map = self.structured_template(category);
        map.insert("emergency_mode".to_string(), Value::Bool(true));
        map.insert("confidence".to_string(), json!(EMERGENCY_CONFIDENCE));
        map.insert(
            "message".to_string(),
            Value::String(
                "The system is operating in emergency mode. Requests are served with minimal functionality."
                    .to_string(),
            ),
        );
        FallbackResponse::Structured(map)
    }

    /// Reduced-service fallback served by cascade prevention.
    pub fn limited_response(&self, category: &str) -> FallbackResponse {
        let mut map = self.structured_template(category);
        map.insert("limited_service".to_string(), Value::Bool(true));
        map.insert("confidence".to_string(), json!(LIMITED_CONFIDENCE));
        map.insert(
            "message".to_string(),
            Value::String(
                "The system is under load. A limited response was returned; please retry later."
                    .to_string(),
            ),
        );
        FallbackResponse::Structured(map)
    }

    fn template(&self, category: &str) -> FallbackResponse {
        self.templates
            .get(category)
            .or_else(|| self.templates.get(GENERAL_CATEGORY))
            .cloned()
            .unwrap_or_else(|| FallbackResponse::text("Service temporarily unavailable."))
    }

    fn structured_template(&self, category: &str) -> serde_json::Map<String, Value> {
        match self.template(category) {
            FallbackResponse::Structured(map) => map,
            FallbackResponse::Text(message) => {
                let mut map = serde_json::Map::new();
                map.insert("message".to_string(), Value::String(message));
                map.insert("fallback_used".to_string(), Value::Bool(true));
                map
            }
        }
    }
}

impl Default for FallbackResponseFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_uses_general() {
        let factory = FallbackResponseFactory::new();
        let response = factory.create_response("no-such-category", None);
        assert_eq!(response, factory.create_response(GENERAL_CATEGORY, None));
        assert!(response.as_text().is_some());
    }

    #[test]
    fn test_triage_copies_are_independent() {
        let factory = FallbackResponseFactory::new();
        let mut first = factory.create_response("triage", None);
        let second = factory.create_response("triage", None);

        first
            .as_structured_mut()
            .unwrap()
            .insert("category".to_string(), json!("mutated"));

        assert_eq!(second.get("category"), Some(&json!("unclassified")));
        assert_eq!(
            factory.create_response("triage", None).get("category"),
            Some(&json!("unclassified"))
        );
    }

    #[test]
    fn test_error_metadata_attached() {
        let factory = FallbackResponseFactory::new();
        let response = factory.create_response("data_analysis", Some("503 upstream"));
        let metadata = response.get("fallback_metadata").unwrap();
        assert_eq!(metadata["error"], json!("503 upstream"));
        assert!(metadata["timestamp"].is_string());

        // Text templates carry no metadata
        let text = factory.create_response(GENERAL_CATEGORY, Some("boom"));
        assert!(text.as_text().is_some());
    }

    #[test]
    fn test_circuit_breaker_variant() {
        let factory = FallbackResponseFactory::new();
        let response = factory.circuit_breaker_response("triage", "anthropic");
        assert!(response.circuit_breaker_triggered());
        assert_eq!(response.confidence(), Some(CIRCUIT_OPEN_CONFIDENCE));
        assert_eq!(response.get("priority"), Some(&json!("medium")));

        let general = factory.circuit_breaker_response(GENERAL_CATEGORY, "anthropic");
        assert!(general.circuit_breaker_triggered());
        assert!(general.get("message").is_some());
    }

    #[test]
    fn test_emergency_and_limited_variants() {
        let factory = FallbackResponseFactory::new();
        let emergency = factory.emergency_response("general");
        assert!(emergency.emergency_mode());
        assert_eq!(emergency.confidence(), Some(EMERGENCY_CONFIDENCE));

        let limited = factory.limited_response("triage");
        assert!(limited.limited_service());
        assert!(!limited.emergency_mode());
    }

    #[test]
    fn test_custom_template() {
        let factory = FallbackResponseFactory::new()
            .with_template("summary", FallbackResponse::text("No summary available"));
        assert_eq!(
            factory.create_response("summary", None).as_text(),
            Some("No summary available")
        );
        assert!(factory.categories().contains(&"summary"));
    }
}
