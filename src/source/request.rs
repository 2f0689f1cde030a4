//! Request source: exposes a previously dispatched request from history.
//!
//! Fields:
//!
//! - `name` (string, required): the history entry, `"req"` within the
//!   unnamed block or `"outer.req"` when the profile uses named blocks.
//! - `field` (string, optional): a dotted path into the recorded request.
//!
//! Validation declares the dependency so the engine can reject references
//! to requests declared at the same position or later.

use crate::constants::SOURCE_REQUEST;
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::source::{
    lookup_path, required_string, EntryRef, Source, SourceBuilder, SourceDeps, SourceEnv,
};
use serde_json::{Map, Value};
use std::sync::Arc;

#[must_use]
pub fn builder() -> SourceBuilder {
    Arc::new(|_ctx, env, field| {
        Box::new(RequestSource {
            env,
            field,
            entry: None,
            select: None,
        })
    })
}

pub struct RequestSource {
    env: SourceEnv,
    field: Map<String, Value>,
    entry: Option<EntryRef>,
    select: Option<String>,
}

/// Shared validation for the request and response sources: parse the entry
/// reference, require qualification when the engine uses named blocks, and
/// read the optional `field` selector.
pub(super) fn validate_entry_fields(
    source_name: &str,
    env: &SourceEnv,
    field: &Map<String, Value>,
) -> Result<(EntryRef, Option<String>), Error> {
    let raw = required_string(source_name, field, "name")?;
    let entry = EntryRef::parse(&raw)?;

    if entry.outer.is_none() && env.outer_block_name.is_some() {
        return Err(Error::validation(format!(
            "{source_name} source reference '{raw}' must be qualified as 'block.request' \
             when the profile uses named blocks"
        )));
    }

    let select = match field.get("field") {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(Error::validation(format!(
                "field 'field' is of wrong type: expected 'string' got '{other}'"
            )))
        }
    };

    Ok((entry, select))
}

pub(super) fn select_value(
    root: Value,
    select: Option<&str>,
    what: &str,
    display: &str,
) -> Result<Value, Error> {
    let Some(path) = select else {
        return Ok(root);
    };

    lookup_path(&root, path).cloned().ok_or_else(|| {
        Error::source_eval(format!(
            "{what} '{display}' has no value at field path '{path}'"
        ))
    })
}

impl Source for RequestSource {
    fn validate(&mut self, _ctx: &Context) -> Result<SourceDeps, Error> {
        let (entry, select) = validate_entry_fields(SOURCE_REQUEST, &self.env, &self.field)?;
        let deps = SourceDeps {
            requests: vec![entry.display()],
            responses: Vec::new(),
        };
        self.entry = Some(entry);
        self.select = select;
        Ok(deps)
    }

    fn evaluate(&self, _ctx: &Context, history: &EvaluationHistory) -> Result<Value, Error> {
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| Error::validation("request source evaluated before validation"))?;

        let request = history
            .request(entry.outer_key(), &entry.name)
            .ok_or_else(|| {
                Error::source_eval(format!(
                    "no request '{}' recorded in history",
                    entry.display()
                ))
            })?;

        let root = serde_json::to_value(request)?;
        select_value(root, self.select.as_deref(), "request", &entry.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Operation, Request};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn env(named: bool) -> SourceEnv {
        SourceEnv {
            outer_block_name: named.then(|| "context".to_string()),
            single_block: false,
            enabled: Arc::new(BTreeSet::new()),
            input: None,
        }
    }

    fn source(env: SourceEnv, name: &str, select: Option<&str>) -> RequestSource {
        let mut field = Map::new();
        field.insert("name".into(), json!(name));
        if let Some(path) = select {
            field.insert("field".into(), json!(path));
        }
        RequestSource {
            env,
            field,
            entry: None,
            select: None,
        }
    }

    #[test]
    fn declares_its_dependency() {
        let mut src = source(env(false), "one", None);
        let deps = src.validate(&Context::background()).unwrap();
        assert_eq!(deps.requests, vec!["one"]);
        assert!(deps.responses.is_empty());
    }

    #[test]
    fn named_blocks_require_qualified_references() {
        let mut src = source(env(true), "one", None);
        let err = src.validate(&Context::background()).unwrap_err();
        assert!(err.to_string().contains("must be qualified"));

        let mut src = source(env(true), "setup.one", None);
        let deps = src.validate(&Context::background()).unwrap();
        assert_eq!(deps.requests, vec!["setup.one"]);
    }

    #[test]
    fn evaluates_to_the_recorded_request() {
        let mut history = EvaluationHistory::default();
        history
            .add_request("", "one", Request::new(Operation::Read, "kv/a"))
            .unwrap();

        let mut src = source(env(false), "one", Some("path"));
        src.validate(&Context::background()).unwrap();
        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("kv/a"));
    }

    #[test]
    fn missing_entry_is_an_evaluation_error() {
        let mut src = source(env(false), "ghost", None);
        src.validate(&Context::background()).unwrap();
        let err = src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
