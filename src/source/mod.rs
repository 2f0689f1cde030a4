//! Pluggable value sources for dynamic profile fields.
//!
//! A field map carrying the `eval_source` / `eval_type` marker pair is
//! resolved by the named [`Source`]. Sources are constructed per field
//! occurrence per evaluation from a [`SourceBuilder`] registered on the
//! engine at construction time; there is no global registry, so tests can
//! build fully isolated engines.

pub mod cel;
pub mod input;
pub mod request;
pub mod response;
pub mod template;

use crate::api::Request;
use crate::config::InputConfig;
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::schema::FieldData;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// History entries a source declares it will read, named `"req"` (within
/// the current or unnamed block) or `"outer.req"`. The engine checks the
/// names against declaration order before any request is dispatched.
#[derive(Debug, Default, Clone)]
pub struct SourceDeps {
    pub requests: Vec<String>,
    pub responses: Vec<String>,
}

/// One dynamic value. `validate` runs once per occurrence as a structural
/// check, `evaluate` computes the value (possibly reading history), and
/// `close` releases any per-source resources.
pub trait Source: Send {
    /// # Errors
    ///
    /// Fails when required fields are missing or of the wrong type.
    fn validate(&mut self, ctx: &Context) -> Result<SourceDeps, Error>;

    /// # Errors
    ///
    /// Fails when the value cannot be produced; always fatal to the
    /// enclosing field resolution.
    fn evaluate(&self, ctx: &Context, history: &EvaluationHistory) -> Result<Value, Error>;

    /// # Errors
    ///
    /// Implementations holding external resources may fail on release.
    fn close(&mut self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// The slice of engine state sources are allowed to see.
#[derive(Clone, Default)]
pub struct SourceEnv {
    /// `None` for the single-unnamed-block convention.
    pub outer_block_name: Option<String>,
    /// Whether the profile has at most one outer block. Template and CEL
    /// history views flatten to the sole block's inner maps in that case,
    /// so `{{responses.one.data.next}}` works without naming the block.
    pub single_block: bool,
    /// Names of every source enabled on the engine. Template and CEL
    /// sources only inject `input` / `requests` / `responses` context when
    /// the corresponding source is enabled.
    pub enabled: Arc<BTreeSet<String>>,
    pub input: Option<Arc<InputBinding>>,
}

impl SourceEnv {
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    #[must_use]
    pub fn flatten_history(&self) -> bool {
        self.outer_block_name.is_none() || self.single_block
    }
}

/// The input schema, originating request, and parsed data bound to the
/// engine when the `input` source is enabled.
#[derive(Debug, Clone)]
pub struct InputBinding {
    pub config: InputConfig,
    pub request: Request,
    pub data: FieldData,
}

/// Constructs a [`Source`] for one field occurrence. The field map is the
/// fully resolved map including the marker keys; sources read their own
/// fields from it and ignore the rest.
pub type SourceBuilder =
    Arc<dyn Fn(&Context, SourceEnv, Map<String, Value>) -> Box<dyn Source> + Send + Sync>;

/// Reads a required string field out of a source's field map.
///
/// # Errors
///
/// Fails when the field is missing or not a string.
pub(crate) fn required_string(
    source_name: &str,
    field: &Map<String, Value>,
    key: &str,
) -> Result<String, Error> {
    let Some(raw) = field.get(key) else {
        return Err(Error::validation(format!(
            "{source_name} source is missing required field '{key}'"
        )));
    };

    match raw {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::validation(format!(
            "field '{key}' is of wrong type: expected 'string' got '{other}'"
        ))),
    }
}

/// A reference to a history entry: an optional outer block name plus the
/// request name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub outer: Option<String>,
    pub name: String,
}

impl EntryRef {
    /// Parses `"req"` or `"outer.req"`.
    ///
    /// # Errors
    ///
    /// Empty components are invalid.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (outer, name) = match raw.split_once('.') {
            Some((outer, name)) => (Some(outer), name),
            None => (None, raw),
        };

        if name.is_empty() || outer.is_some_and(str::is_empty) {
            return Err(Error::validation(format!(
                "invalid history reference '{raw}'"
            )));
        }

        Ok(Self {
            outer: outer.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// The history key for the outer component: the named block, or the
    /// unnamed block when the engine uses the single-block convention.
    #[must_use]
    pub fn outer_key(&self) -> &str {
        self.outer.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn display(&self) -> String {
        match &self.outer {
            Some(outer) => format!("{outer}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Follows a dotted path into a JSON value. An empty path returns the value
/// itself; a leading `.` is tolerated for compatibility with documents
/// written against dot-rooted template syntax.
#[must_use]
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in trimmed.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
