//! Typed profile configuration model.
//!
//! Builds [`OuterConfig`] / [`RequestConfig`] / [`InputConfig`] /
//! [`OutputConfig`] values out of a raw [`Document`]. Expression fields stay
//! untyped (`serde_json::Value`): they may be literals, lists, or maps
//! carrying the `eval_source` / `eval_type` marker pair, and are resolved
//! by the engine at evaluation time.
//!
//! Parse errors are path-prefixed (`context.0.request.2: …`) so operators
//! can locate the offending block in large documents.

use crate::constants::{BLOCK_FIELDS, BLOCK_INPUT, BLOCK_OUTPUT, BLOCK_REQUEST};
use crate::document::{BlockEntry, Document};
use crate::engine::convert::{self, FieldKind};
use crate::error::Error;
use crate::schema::FieldSchema;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_-]*$").expect("static regex compiles"));

/// Checks a block or request name against the naming convention: a leading
/// letter or underscore followed by letters, digits, underscores, dashes.
fn validate_name_convention(kind: &str, name: &str) -> Result<(), Error> {
    if !VALID_NAME.is_match(name) {
        return Err(Error::config(format!(
            "{kind} name '{name}' is invalid: must start with a letter or underscore \
             and contain only letters, digits, underscores, and dashes"
        )));
    }
    Ok(())
}

/// Outer blocks have unique, convention-conforming names; requests have
/// unique, convention-conforming names within their block. With `named`
/// false (the unnamed single-block convention) the outer-name checks are
/// skipped for blocks without a name.
pub fn validate_block_names(profile: &[OuterConfig], named: bool) -> Result<(), Error> {
    let mut seen_outer: HashMap<&str, usize> = HashMap::new();

    for (index, outer) in profile.iter().enumerate() {
        if named || !outer.name.is_empty() {
            validate_name_convention("outer block", &outer.name)?;

            if let Some(existing) = seen_outer.insert(outer.name.as_str(), index) {
                return Err(Error::config(format!(
                    "duplicate outer block name '{}' found at indices {existing} and {index}",
                    outer.name
                )));
            }
        }

        let mut seen_requests: HashMap<&str, usize> = HashMap::new();
        for (req_index, request) in outer.requests.iter().enumerate() {
            validate_name_convention(
                &format!("request in block '{}'", outer.name),
                &request.name,
            )?;

            if let Some(existing) = seen_requests.insert(request.name.as_str(), req_index) {
                return Err(Error::config(format!(
                    "duplicate request name '{}' in outer block '{}' at indices \
                     {existing} and {req_index}",
                    request.name, outer.name
                )));
            }
        }
    }

    Ok(())
}

/// A named execution block containing ordered requests.
#[derive(Debug, Clone, Default)]
pub struct OuterConfig {
    pub name: String,
    pub requests: Vec<RequestConfig>,
    /// The lowered body, kept because source resolution operates on raw
    /// values rather than the typed model.
    pub raw: Map<String, Value>,
}

impl OuterConfig {
    /// An unnamed block wrapping pre-parsed requests, for engines that use
    /// the single-block convention.
    #[must_use]
    pub fn unnamed(requests: Vec<RequestConfig>) -> Self {
        Self {
            requests,
            ..Self::default()
        }
    }
}

/// A single request specification.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub name: String,
    pub operation: Option<Value>,
    pub path: Option<Value>,
    /// `None` when the document omits the field entirely; a present field
    /// resolving to the empty string is a deliberate override of the
    /// engine's default token.
    pub token: Option<Value>,
    pub data: Option<Value>,
    pub allow_failure: Option<Value>,
    pub raw: Map<String, Value>,
}

/// The optional typed input schema declared by a profile.
#[derive(Debug, Clone, Default)]
pub struct InputConfig {
    pub fields: Vec<FieldSchemaConfig>,
    pub raw: Map<String, Value>,
}

/// One declared input field.
#[derive(Debug, Clone, Default)]
pub struct FieldSchemaConfig {
    pub name: String,
    pub type_raw: String,
    pub field_type: FieldKind,
    pub default: Option<Value>,
    pub description: String,
    pub required: bool,
    pub deprecated: bool,
    pub query: bool,
    pub allowed_values: Vec<Value>,
}

impl FieldSchemaConfig {
    #[must_use]
    pub fn to_schema(&self) -> FieldSchema {
        FieldSchema {
            field_type: self.field_type,
            default: self.default.clone(),
            description: self.description.clone(),
            required: self.required,
            deprecated: self.deprecated,
            query: self.query,
            allowed_values: self.allowed_values.clone(),
        }
    }
}

/// The optional response projection declared by a profile.
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub data: Option<Value>,
    /// Header name to ordered expression list.
    pub headers: IndexMap<String, Vec<Value>>,
    pub raw: Map<String, Value>,
}

/// Resolves a block's name from its single label or an explicit `type`
/// attribute. Both missing is an error; both present and different is also
/// an error.
fn resolve_block_name(entry: &BlockEntry, what: &str) -> Result<String, Error> {
    let explicit = match entry.get_value("type") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::String(_)) | None => None,
        Some(other) => {
            return Err(Error::config(format!(
                "{what} 'type' is of wrong type: expected 'string' got '{other}'"
            )))
        }
    };

    match (explicit, entry.labels.as_slice()) {
        (Some(name), []) => Ok(name),
        (None, [label]) => Ok(label.clone()),
        (Some(name), [label]) if name == *label => Ok(name),
        (Some(name), [label]) => Err(Error::config(format!(
            "{what} declares conflicting names '{label}' and '{name}'"
        ))),
        (None, []) => Err(Error::config(format!("{what} type must be specified"))),
        (_, labels) => Err(Error::config(format!(
            "{what} has too many labels: {labels:?}"
        ))),
    }
}

/// Parses all outer blocks stored under `outer_key`.
///
/// # Errors
///
/// Fails with a `outer_key.index`-prefixed message on any malformed block.
pub fn parse_outer_configs(outer_key: &str, doc: &Document) -> Result<Vec<OuterConfig>, Error> {
    let entries = doc.block_entries(outer_key);
    let mut result = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{outer_key}.{index}");
        let name =
            resolve_block_name(entry, outer_key).map_err(|e| e.with_context(&prefix))?;
        let requests = parse_request_configs(entry).map_err(|e| e.with_context(&prefix))?;

        result.push(OuterConfig {
            name,
            requests,
            raw: entry.raw_map(),
        });
    }

    Ok(result)
}

/// Parses the `request` sub-blocks of an outer block in declared order.
///
/// # Errors
///
/// Fails with a `request.index`-prefixed message on any malformed request.
pub fn parse_request_configs(outer: &BlockEntry) -> Result<Vec<RequestConfig>, Error> {
    let entries = outer.block_entries(BLOCK_REQUEST);
    let mut result = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{BLOCK_REQUEST}.{index}");
        let name =
            resolve_block_name(entry, BLOCK_REQUEST).map_err(|e| e.with_context(&prefix))?;

        result.push(RequestConfig {
            name,
            operation: entry.get_value("operation").cloned(),
            path: entry.get_value("path").cloned(),
            token: entry.get_value("token").cloned(),
            data: entry.get_value("data").cloned(),
            allow_failure: entry.get_value("allow_failure").cloned(),
            raw: entry.raw_map(),
        });
    }

    Ok(result)
}

/// Parses the singleton `input` block, if any.
///
/// # Errors
///
/// Fails when more than one `input` block is present or a field schema is
/// malformed.
pub fn parse_input_config(doc: &Document) -> Result<Option<InputConfig>, Error> {
    let entries = doc.singleton_entries(BLOCK_INPUT);
    let entry = match entries.as_slice() {
        [] => return Ok(None),
        [single] => single,
        _ => {
            return Err(Error::config(format!(
                "only a single '{BLOCK_INPUT}' block is allowed"
            )))
        }
    };

    if !entry.labels.is_empty() {
        return Err(Error::config(format!(
            "{BLOCK_INPUT}: type must not be specified in the block definition"
        )));
    }

    let mut fields = Vec::new();
    for fields_block in entry.singleton_entries(BLOCK_FIELDS) {
        parse_field_schemas(&fields_block, &mut fields)
            .map_err(|e| e.with_context(BLOCK_INPUT))?;
    }

    Ok(Some(InputConfig {
        fields,
        raw: entry.raw_map(),
    }))
}

/// Parses the field declarations within one `fields` block. Fields use the
/// two-key form (`string "name" { … }`), the keyed form with an explicit
/// `name` attribute, or an explicit `type` attribute overriding the key.
fn parse_field_schemas(
    fields_block: &BlockEntry,
    out: &mut Vec<FieldSchemaConfig>,
) -> Result<(), Error> {
    for (position, (key, entry)) in fields_block.all_block_entries().iter().enumerate() {
        out.push(parse_field_schema(key, entry, position)?);
    }
    Ok(())
}

fn parse_field_schema(
    key: &str,
    entry: &BlockEntry,
    index: usize,
) -> Result<FieldSchemaConfig, Error> {
    let prefix = format!("{BLOCK_FIELDS}.{index}");

    let explicit_type = match entry.get_value("type") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let explicit_name = match entry.get_value("name") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    let type_raw = explicit_type.unwrap_or_else(|| key.to_string());
    let name = match (explicit_name, entry.labels.as_slice()) {
        (Some(name), []) => name,
        (None, [label]) => label.clone(),
        (Some(name), [label]) if name == *label => name,
        _ => {
            return Err(Error::config(format!(
                "{prefix}: field type and name must be specified"
            )))
        }
    };

    let field_type = FieldKind::parse(&type_raw)
        .map_err(|e| Error::config(format!("{prefix}: {e}")))?;

    let bool_field = |field: &str| -> Result<bool, Error> {
        match entry.get_value(field) {
            None => Ok(false),
            Some(v) => convert::to_bool(v)
                .map_err(|e| Error::config(format!("{prefix}: field '{field}': {e}"))),
        }
    };

    Ok(FieldSchemaConfig {
        name,
        field_type,
        type_raw,
        default: entry.get_value("default").cloned(),
        description: match entry.get_value("description") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        },
        required: bool_field("required")?,
        deprecated: bool_field("deprecated")?,
        query: bool_field("query")?,
        allowed_values: match entry.get_value("allowed_values") {
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        },
    })
}

/// Parses the singleton `output` block, if any.
///
/// # Errors
///
/// Fails when more than one `output` block is present or `headers` is not a
/// map of expression lists.
pub fn parse_output_config(doc: &Document) -> Result<Option<OutputConfig>, Error> {
    let entries = doc.singleton_entries(BLOCK_OUTPUT);
    let entry = match entries.as_slice() {
        [] => return Ok(None),
        [single] => single,
        _ => {
            return Err(Error::config(format!(
                "only a single '{BLOCK_OUTPUT}' block is allowed"
            )))
        }
    };

    if !entry.labels.is_empty() {
        return Err(Error::config(format!(
            "{BLOCK_OUTPUT}: type must not be specified in the block definition"
        )));
    }

    let mut headers = IndexMap::new();
    if let Some(raw_headers) = entry.get_value("headers") {
        let Value::Object(map) = raw_headers else {
            return Err(Error::config(format!(
                "{BLOCK_OUTPUT}: 'headers' must be a map of expression lists"
            )));
        };
        for (header, exprs) in map {
            let list = match exprs {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            headers.insert(header.clone(), list);
        }
    }

    Ok(Some(OutputConfig {
        data: entry.get_value("data").cloned(),
        headers,
        raw: entry.raw_map(),
    }))
}

/// A fully parsed profile document, as the store consumes it.
#[derive(Debug, Clone)]
pub struct ProfileDocument {
    pub input: Option<InputConfig>,
    pub outers: Vec<OuterConfig>,
    pub output: Option<OutputConfig>,
}

impl ProfileDocument {
    /// Parses a document and requires at least one outer block under
    /// `outer_key`.
    ///
    /// # Errors
    ///
    /// Fails on syntax errors, malformed blocks, or a missing outer block.
    pub fn parse(text: &str, outer_key: &str) -> Result<Self, Error> {
        let doc = Document::parse(text)?;

        let input = parse_input_config(&doc)
            .map_err(|e| e.with_context("failed to parse input configuration block"))?;
        let outers = parse_outer_configs(outer_key, &doc)
            .map_err(|e| e.with_context("failed to parse profile"))?;
        let output = parse_output_config(&doc)
            .map_err(|e| e.with_context("failed to parse output configuration block"))?;

        if outers.is_empty() {
            return Err(Error::config(format!(
                "profile must have at least one '{outer_key}' block"
            )));
        }

        validate_block_names(&outers, true)?;

        Ok(Self {
            input,
            outers,
            output,
        })
    }
}
