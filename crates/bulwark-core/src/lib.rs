//! # bulwark-core
//!
//! Deterministic building blocks for fault-tolerant calls to unreliable
//! downstream operations.
//!
//! This crate answers:
//! - What kind of failure was this?
//! - What do we return instead when the real call cannot succeed?
//!
//! ## Key Guarantees
//!
//! 1. **Pure**: classification and fallback construction never perform I/O
//! 2. **Total**: every error classifies, unknown categories resolve to `general`
//! 3. **Independent copies**: fallback templates are never shared with callers
//!
//! Stateful pieces (circuit breakers, retry, health monitoring and
//! coordination) live in `bulwark-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use bulwark_core::{ErrorClassifier, FailureType, FallbackResponseFactory, OperationError};
//!
//! let classifier = ErrorClassifier::new();
//! let err = OperationError::RateLimited { retry_after: None };
//! assert_eq!(classifier.classify(&err), FailureType::RateLimit);
//!
//! let factory = FallbackResponseFactory::new();
//! let response = factory.create_response("triage", Some("429 from provider"));
//! assert!(response.is_structured());
//! ```

pub mod classifier;
pub mod failure;
pub mod fallback;
pub mod health;

// Re-export main types at crate root
pub use classifier::{ClassificationRule, ErrorClassifier};
pub use failure::{FailureType, OperationError};
pub use fallback::{
    FallbackError, FallbackResponse, FallbackResponseFactory, StructuredFallbackBuilder,
    StructuredSchema, GENERAL_CATEGORY,
};
pub use health::{AgentFallbackStatus, SystemFallbackStatus, SystemHealthLevel};
