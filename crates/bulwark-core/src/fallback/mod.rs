//! Fallback responses.
//!
//! This module provides:
//! - The `FallbackResponse` sum type (text or structured)
//! - Category templates with circuit-open, emergency and limited variants
//! - Schema-driven fallbacks for typed results

mod factory;
mod response;
mod structured;

pub use factory::{
    FallbackResponseFactory, CIRCUIT_OPEN_CONFIDENCE, EMERGENCY_CONFIDENCE, GENERAL_CATEGORY,
    LIMITED_CONFIDENCE,
};
pub use response::FallbackResponse;
pub use structured::{StructuredFallbackBuilder, StructuredSchema, PLACEHOLDER_TEXT};

use thiserror::Error;

/// Errors from building fallbacks.
#[derive(Error, Debug, Clone)]
pub enum FallbackError {
    #[error("Schema for {schema} does not compile: {reason}")]
    InvalidSchema { schema: String, reason: String },

    #[error("Cannot construct a fallback instance of {schema}: {reason}")]
    Unconstructable { schema: String, reason: String },

    #[error("Value does not conform to {schema}: {}", reasons.join("; "))]
    SchemaMismatch { schema: String, reasons: Vec<String> },
}

impl FallbackError {
    /// Whether this error means the program is misconfigured.
    ///
    /// Configuration errors are surfaced to the caller, never replaced by
    /// a fallback.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FallbackError::InvalidSchema { .. } | FallbackError::Unconstructable { .. }
        )
    }
}
