//! Weak type coercion for resolved field values.
//!
//! Source results and caller input arrive as untyped JSON; destinations are
//! declared through `eval_type` tags or input schemas. Coercion is
//! deliberately permissive across scalar kinds (a string `"42"` satisfies
//! an `int` destination) so environment-derived values slot into typed
//! fields, but it never invents structure: objects only coerce to `map`,
//! and scalars only wrap into a single-element string list.

use serde_json::{Map, Number, Value};
use std::fmt;

/// The closed set of value kinds shared by `eval_type` tags and input field
/// schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    String,
    Int,
    Float64,
    Bool,
    StringList,
    Map,
    #[default]
    Any,
}

impl FieldKind {
    /// Parses a type tag. Aliases follow the wire format: `map` and
    /// `map[string]interface{}` are equivalent, as are `any` and
    /// `interface{}`.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized tag.
    pub fn parse(tag: &str) -> Result<Self, String> {
        match tag {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float64" => Ok(Self::Float64),
            "bool" => Ok(Self::Bool),
            "[]string" => Ok(Self::StringList),
            "map" | "map[string]interface{}" => Ok(Self::Map),
            "any" | "interface{}" => Ok(Self::Any),
            other => Err(format!("unsupported type conversion: {other}")),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::StringList => "[]string",
            Self::Map => "map",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The zero value for a kind, used when a field is absent and has no
/// default.
#[must_use]
pub fn zero_value(kind: FieldKind) -> Value {
    match kind {
        FieldKind::String => Value::String(String::new()),
        FieldKind::Int => Value::Number(0.into()),
        FieldKind::Float64 => Value::Number(Number::from_f64(0.0).expect("0.0 is finite")),
        FieldKind::Bool => Value::Bool(false),
        FieldKind::StringList => Value::Array(Vec::new()),
        FieldKind::Map => Value::Object(Map::new()),
        FieldKind::Any => Value::Null,
    }
}

/// Weakly coerces `value` to `kind`.
///
/// # Errors
///
/// Returns a description of the mismatch when no coercion exists.
pub fn coerce(value: &Value, kind: FieldKind) -> Result<Value, String> {
    match kind {
        FieldKind::Any => Ok(value.clone()),
        FieldKind::String => to_string(value).map(Value::String),
        FieldKind::Int => to_i64(value).map(|n| Value::Number(n.into())),
        FieldKind::Float64 => to_f64(value).and_then(|f| {
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| "non-finite float".to_string())
        }),
        FieldKind::Bool => to_bool(value).map(Value::Bool),
        FieldKind::StringList => to_string_list(value)
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        FieldKind::Map => to_map(value).map(Value::Object),
    }
}

/// Coerces to a string. Scalars stringify; null reads as the empty string.
///
/// # Errors
///
/// Arrays and objects do not coerce.
pub fn to_string(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("cannot convert value to type 'string': {other}")),
    }
}

fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("cannot convert number to type 'int': {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .map_err(|_| format!("cannot convert value to type 'int': {s:?}")),
        other => Err(format!("cannot convert value to type 'int': {other}")),
    }
}

fn to_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("cannot convert number to type 'float64': {n}")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("cannot convert value to type 'float64': {s:?}")),
        other => Err(format!("cannot convert value to type 'float64': {other}")),
    }
}

/// Coerces to a bool. Strings accept the usual spellings (`true`, `1`,
/// `false`, `0`, empty); numbers are truthy when non-zero.
///
/// # Errors
///
/// Unrecognized strings and structured values do not coerce.
pub fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" => Ok(false),
            "true" | "1" => Ok(true),
            other => Err(format!("cannot convert value to type 'bool': {other:?}")),
        },
        other => Err(format!("cannot convert value to type 'bool': {other}")),
    }
}

fn to_string_list(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(to_string).collect(),
        scalar => Ok(vec![to_string(scalar)?]),
    }
}

/// Coerces to an object map. Null reads as the empty map.
///
/// # Errors
///
/// Non-object values do not coerce.
pub fn to_map(value: &Value) -> Result<Map<String, Value>, String> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(format!("cannot convert value to type 'map': {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_tags_and_aliases() {
        assert_eq!(FieldKind::parse("string").unwrap(), FieldKind::String);
        assert_eq!(FieldKind::parse("[]string").unwrap(), FieldKind::StringList);
        assert_eq!(
            FieldKind::parse("map[string]interface{}").unwrap(),
            FieldKind::Map
        );
        assert_eq!(FieldKind::parse("interface{}").unwrap(), FieldKind::Any);
        assert!(FieldKind::parse("duration").is_err());
    }

    #[test]
    fn string_to_int_coercion() {
        assert_eq!(coerce(&json!("42"), FieldKind::Int).unwrap(), json!(42));
        assert_eq!(coerce(&json!(" 7 "), FieldKind::Int).unwrap(), json!(7));
        assert!(coerce(&json!("seven"), FieldKind::Int).is_err());
    }

    #[test]
    fn numbers_stringify() {
        assert_eq!(
            coerce(&json!(3.5), FieldKind::String).unwrap(),
            json!("3.5")
        );
        assert_eq!(
            coerce(&json!(true), FieldKind::String).unwrap(),
            json!("true")
        );
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(coerce(&json!("true"), FieldKind::Bool).unwrap(), json!(true));
        assert_eq!(coerce(&json!("0"), FieldKind::Bool).unwrap(), json!(false));
        assert_eq!(coerce(&json!(""), FieldKind::Bool).unwrap(), json!(false));
        assert_eq!(coerce(&json!(2), FieldKind::Bool).unwrap(), json!(true));
        assert!(coerce(&json!("yes-ish"), FieldKind::Bool).is_err());
    }

    #[test]
    fn scalar_wraps_into_string_list() {
        assert_eq!(
            coerce(&json!("solo"), FieldKind::StringList).unwrap(),
            json!(["solo"])
        );
        assert_eq!(
            coerce(&json!([1, "two"]), FieldKind::StringList).unwrap(),
            json!(["1", "two"])
        );
    }

    #[test]
    fn structure_is_never_invented() {
        assert!(coerce(&json!(["a"]), FieldKind::String).is_err());
        assert!(coerce(&json!("x"), FieldKind::Map).is_err());
        assert_eq!(coerce(&json!(null), FieldKind::Map).unwrap(), json!({}));
    }

    #[test]
    fn any_passes_through() {
        let v = json!({"nested": [1, 2]});
        assert_eq!(coerce(&v, FieldKind::Any).unwrap(), v);
    }
}
