//! Schema-driven fallbacks for typed results.
//!
//! A result type declares its JSON Schema through [`StructuredSchema`].
//! [`StructuredFallbackBuilder`] validates raw operation output against that
//! schema and, when a substitute is needed, builds one from declared
//! defaults:
//!
//! | Declared type | Default |
//! |---------------|---------|
//! | `default` keyword | that value |
//! | `enum` / `const` | first allowed value |
//! | string | placeholder text |
//! | integer | `0` |
//! | number | `0.0` |
//! | boolean | `false` |
//! | array | `[]` |
//! | object | `{}` |
//! | anything else | `null` |

use jsonschema::Validator;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use super::FallbackError;

/// Placeholder used for string fields without a declared default.
pub const PLACEHOLDER_TEXT: &str = "Unavailable (fallback response)";

type BuilderCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

/// Compiled builders keyed by result type (initialized once per type, reused).
static COMPILED_BUILDERS: OnceLock<BuilderCache> = OnceLock::new();

/// A typed result with a JSON Schema.
pub trait StructuredSchema: DeserializeOwned + 'static {
    /// JSON Schema describing the serialized form.
    fn json_schema() -> Value;

    /// Name used in logs and errors.
    fn schema_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Last-resort instance when the schema defaults do not deserialize.
    fn fallback_instance() -> Option<Self> {
        None
    }
}

/// Validates and builds instances of a [`StructuredSchema`] type.
pub struct StructuredFallbackBuilder<T> {
    schema: Value,
    validator: Validator,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StructuredSchema> StructuredFallbackBuilder<T> {
    /// Compile the type's schema.
    pub fn new() -> Result<Self, FallbackError> {
        let schema = T::json_schema();
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| FallbackError::InvalidSchema {
                schema: T::schema_name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            schema,
            validator,
            _marker: PhantomData,
        })
    }

    /// The compiled builder for `T`, shared process-wide.
    ///
    /// Only successful compilations are cached; an invalid schema is
    /// reported on every call.
    pub fn shared() -> Result<Arc<Self>, FallbackError> {
        let cache = COMPILED_BUILDERS.get_or_init(Default::default);
        let key = TypeId::of::<T>();

        if let Some(cached) = cache.read().get(&key).cloned() {
            if let Ok(builder) = cached.downcast::<Self>() {
                return Ok(builder);
            }
        }

        let builder = Arc::new(Self::new()?);
        cache
            .write()
            .entry(key)
            .or_insert_with(|| Arc::clone(&builder) as Arc<dyn Any + Send + Sync>);
        Ok(builder)
    }

    /// Accept a raw value only if it conforms to the schema and deserializes.
    pub fn validate(&self, value: &Value) -> Result<T, FallbackError> {
        if !self.validator.is_valid(value) {
            let reasons = self
                .validator
                .iter_errors(value)
                .map(|e| e.to_string())
                .collect::<Vec<_>>();
            return Err(FallbackError::SchemaMismatch {
                schema: T::schema_name().to_string(),
                reasons,
            });
        }

        serde_json::from_value(value.clone()).map_err(|e| FallbackError::SchemaMismatch {
            schema: T::schema_name().to_string(),
            reasons: vec![e.to_string()],
        })
    }

    /// The default value derived from the schema.
    pub fn default_value(&self) -> Value {
        match self.schema.get("properties").and_then(Value::as_object) {
            Some(properties) => {
                let object: Map<String, Value> = properties
                    .iter()
                    .map(|(name, property)| (name.clone(), property_default(property)))
                    .collect();
                Value::Object(object)
            }
            None => property_default(&self.schema),
        }
    }

    /// Build a fallback instance.
    ///
    /// Errors only when neither the schema defaults nor
    /// [`StructuredSchema::fallback_instance`] yield a value; that is a
    /// configuration error.
    pub fn build(&self) -> Result<T, FallbackError> {
        let value = self.default_value();
        match serde_json::from_value::<T>(value) {
            Ok(instance) => Ok(instance),
            Err(construct_err) => {
                tracing::debug!(
                    schema = T::schema_name(),
                    error = %construct_err,
                    "Schema defaults did not deserialize, trying fallback instance"
                );
                T::fallback_instance().ok_or_else(|| FallbackError::Unconstructable {
                    schema: T::schema_name().to_string(),
                    reason: construct_err.to_string(),
                })
            }
        }
    }
}

impl<T> std::fmt::Debug for StructuredFallbackBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredFallbackBuilder")
            .field("schema", &self.schema)
            .finish()
    }
}

fn property_default(property: &Value) -> Value {
    if let Some(default) = property.get("default") {
        return default.clone();
    }
    if let Some(constant) = property.get("const") {
        return constant.clone();
    }
    if let Some(first) = property
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
    {
        return first.clone();
    }

    let declared = match property.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    };

    match declared {
        Some("string") => Value::String(PLACEHOLDER_TEXT.to_string()),
        Some("integer") => json!(0),
        Some("number") => json!(0.0),
        Some("boolean") => Value::Bool(false),
        Some("array") => Value::Array(Vec::new()),
        Some("object") => Value::Object(Map::new()),
        _ => Value::Null,
    }
}
