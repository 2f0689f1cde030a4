//! Response source: exposes a recorded response from history.
//!
//! Same fields as the request source. A request that was dispatched but
//! failed leaves no response in history, so referencing it here is an
//! evaluation error even when the failure itself was allowed.

use crate::constants::SOURCE_RESPONSE;
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::source::request::{select_value, validate_entry_fields};
use crate::source::{EntryRef, Source, SourceBuilder, SourceDeps, SourceEnv};
use serde_json::{Map, Value};
use std::sync::Arc;

#[must_use]
pub fn builder() -> SourceBuilder {
    Arc::new(|_ctx, env, field| {
        Box::new(ResponseSource {
            env,
            field,
            entry: None,
            select: None,
        })
    })
}

pub struct ResponseSource {
    env: SourceEnv,
    field: Map<String, Value>,
    entry: Option<EntryRef>,
    select: Option<String>,
}

impl Source for ResponseSource {
    fn validate(&mut self, _ctx: &Context) -> Result<SourceDeps, Error> {
        let (entry, select) = validate_entry_fields(SOURCE_RESPONSE, &self.env, &self.field)?;
        let deps = SourceDeps {
            requests: Vec::new(),
            responses: vec![entry.display()],
        };
        self.entry = Some(entry);
        self.select = select;
        Ok(deps)
    }

    fn evaluate(&self, _ctx: &Context, history: &EvaluationHistory) -> Result<Value, Error> {
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| Error::validation("response source evaluated before validation"))?;

        let response = history
            .response(entry.outer_key(), &entry.name)
            .ok_or_else(|| {
                Error::source_eval(format!(
                    "no response '{}' recorded in history",
                    entry.display()
                ))
            })?;

        let root = serde_json::to_value(response)?;
        select_value(root, self.select.as_deref(), "response", &entry.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Response;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn source(name: &str, select: Option<&str>) -> ResponseSource {
        let mut field = Map::new();
        field.insert("name".into(), json!(name));
        if let Some(path) = select {
            field.insert("field".into(), json!(path));
        }
        ResponseSource {
            env: SourceEnv {
                outer_block_name: None,
                single_block: false,
                enabled: Arc::new(BTreeSet::new()),
                input: None,
            },
            field,
            entry: None,
            select: None,
        }
    }

    #[test]
    fn evaluates_selected_response_data() {
        let mut history = EvaluationHistory::default();
        let mut resp = Response::default();
        resp.data.insert("next".into(), json!("b"));
        history.add_response("", "one", resp).unwrap();

        let mut src = source("one", Some("data.next"));
        src.validate(&Context::background()).unwrap();
        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("b"));
    }

    #[test]
    fn absent_response_fails_even_for_recorded_requests() {
        let mut history = EvaluationHistory::default();
        history
            .add_request("", "one", crate::api::Request::default())
            .unwrap();

        let mut src = source("one", None);
        src.validate(&Context::background()).unwrap();
        let err = src.evaluate(&Context::background(), &history).unwrap_err();
        assert!(err.to_string().contains("no response 'one'"));
    }

    #[test]
    fn missing_selector_path_is_an_error() {
        let mut history = EvaluationHistory::default();
        history.add_response("", "one", Response::default()).unwrap();

        let mut src = source("one", Some("data.absent"));
        src.validate(&Context::background()).unwrap();
        assert!(src.evaluate(&Context::background(), &history).is_err());
    }
}
