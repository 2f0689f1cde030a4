//! Typed input schemas for profile execution.
//!
//! A profile may declare an `input` block describing the fields callers are
//! expected to supply. The declared schema is merged into the request's
//! [`FieldData`], which then validates types, enforces required fields and
//! allowed values, and serves defaulted reads to the `input` source.

use crate::engine::convert::{self, FieldKind};
use crate::error::Error;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Schema for a single input field.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    pub field_type: FieldKind,
    pub default: Option<Value>,
    pub description: String,
    pub required: bool,
    pub deprecated: bool,
    pub query: bool,
    pub allowed_values: Vec<Value>,
}

/// A request body bound to a field schema.
///
/// `raw` holds the caller-supplied values untouched; reads go through weak
/// coercion so, for example, a string-typed `"42"` satisfies an `int` field.
/// Raw keys without a schema entry are tolerated and ignored by validation.
#[derive(Debug, Clone, Default)]
pub struct FieldData {
    pub schema: IndexMap<String, FieldSchema>,
    pub raw: Map<String, Value>,
}

impl FieldData {
    #[must_use]
    pub fn new(schema: IndexMap<String, FieldSchema>, raw: Map<String, Value>) -> Self {
        Self { schema, raw }
    }

    /// Type-checks every supplied value that has a schema entry and
    /// enforces `allowed_values` where declared.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in &self.raw {
            let Some(schema) = self.schema.get(name) else {
                continue;
            };

            let coerced = convert::coerce(value, schema.field_type).map_err(|e| {
                Error::validation(format!(
                    "field '{name}' has invalid value for type '{}': {e}",
                    schema.field_type
                ))
            })?;

            if !schema.allowed_values.is_empty()
                && !schema.allowed_values.iter().any(|v| *v == coerced)
            {
                return Err(Error::validation(format!(
                    "field '{name}' has value not in allowed_values"
                )));
            }
        }

        Ok(())
    }

    /// Ensures every `required` schema field was supplied.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first missing field.
    pub fn validate_required(&self) -> Result<(), Error> {
        for (name, schema) in &self.schema {
            if schema.required && !self.raw.contains_key(name) {
                return Err(Error::validation(format!(
                    "missing required field '{name}'"
                )));
            }
        }

        Ok(())
    }

    /// Reads a field: the supplied value, the schema default, or the type's
    /// zero value, coerced to the declared type. Unknown fields read as
    /// null.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let Some(schema) = self.schema.get(name) else {
            return self.raw.get(name).cloned().unwrap_or(Value::Null);
        };

        let raw = self
            .raw
            .get(name)
            .or(schema.default.as_ref())
            .cloned()
            .unwrap_or_else(|| convert::zero_value(schema.field_type));

        convert::coerce(&raw, schema.field_type)
            .unwrap_or_else(|_| convert::zero_value(schema.field_type))
    }

    /// Reads a field only if the caller supplied it, coerced to the
    /// declared type when one exists.
    #[must_use]
    pub fn get_ok(&self, name: &str) -> Option<Value> {
        let raw = self.raw.get(name)?;
        match self.schema.get(name) {
            Some(schema) => convert::coerce(raw, schema.field_type).ok(),
            None => Some(raw.clone()),
        }
    }
}
