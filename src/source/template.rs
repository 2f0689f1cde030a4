//! Template source: `{{dotted.path}}` interpolation over evaluation state.
//!
//! Fields:
//!
//! - `template` (string, required): the text to render.
//! - `data` (map, optional): additional context merged under its own keys.
//!
//! The render context additionally carries `input`, `requests`, and
//! `responses` when the corresponding sources are enabled on the engine.
//! With the single-unnamed-block convention the history views are the inner
//! maps (`{{responses.one.data.next}}`); with named outer blocks they are
//! keyed by block (`{{responses.setup.enable.data.id}}`).

use crate::constants::{SOURCE_INPUT, SOURCE_REQUEST, SOURCE_RESPONSE, SOURCE_TEMPLATE};
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::source::{lookup_path, required_string, Source, SourceBuilder, SourceDeps, SourceEnv};
use serde_json::{Map, Value};
use std::sync::Arc;

#[must_use]
pub fn builder() -> SourceBuilder {
    Arc::new(|_ctx, env, field| {
        Box::new(TemplateSource {
            env,
            field,
            template: String::new(),
            data: Map::new(),
        })
    })
}

pub struct TemplateSource {
    env: SourceEnv,
    field: Map<String, Value>,
    template: String,
    data: Map<String, Value>,
}

impl Source for TemplateSource {
    fn validate(&mut self, _ctx: &Context) -> Result<SourceDeps, Error> {
        self.template = required_string(SOURCE_TEMPLATE, &self.field, "template")?;

        match self.field.get("data") {
            None => {}
            Some(Value::Object(map)) => self.data = map.clone(),
            Some(other) => {
                return Err(Error::validation(format!(
                    "field 'data' is of wrong type: expected 'map' got '{other}'"
                )))
            }
        }

        Ok(SourceDeps::default())
    }

    fn evaluate(&self, _ctx: &Context, history: &EvaluationHistory) -> Result<Value, Error> {
        let mut context = self.data.clone();

        if self.env.is_enabled(SOURCE_REQUEST) {
            context.insert(
                "requests".into(),
                history.requests_value(self.env.flatten_history()),
            );
        }

        if self.env.is_enabled(SOURCE_RESPONSE) {
            context.insert(
                "responses".into(),
                history.responses_value(self.env.flatten_history()),
            );
        }

        if self.env.is_enabled(SOURCE_INPUT) {
            if let Some(input) = &self.env.input {
                context.insert("input".into(), Value::Object(input.data.raw.clone()));
            }
        }

        let rendered = render(&self.template, &Value::Object(context))?;
        Ok(Value::String(rendered))
    }
}

/// Renders `{{path}}` references against the context. Unclosed `{{` is
/// treated as literal text; a path that resolves to nothing is an error.
fn render(template: &str, context: &Value) -> Result<String, Error> {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("{{") {
        result.push_str(&remaining[..start]);
        let after_open = &remaining[start + 2..];

        let Some(end) = after_open.find("}}") else {
            result.push_str("{{");
            remaining = after_open;
            continue;
        };

        let path = after_open[..end].trim();
        let value = lookup_path(context, path).ok_or_else(|| {
            Error::source_eval(format!("template references unknown value '{path}'"))
        })?;
        result.push_str(&render_value(value)?);

        remaining = &after_open[end + 2..];
    }

    result.push_str(remaining);
    Ok(result)
}

fn render_value(value: &Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        structured => serde_json::to_string(structured).map_err(Error::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Response;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn env_with(enabled: &[&str], flatten: bool) -> SourceEnv {
        SourceEnv {
            outer_block_name: if flatten {
                None
            } else {
                Some("context".into())
            },
            single_block: false,
            enabled: Arc::new(enabled.iter().map(|s| (*s).to_string()).collect::<BTreeSet<_>>()),
            input: None,
        }
    }

    fn source(template: &str, env: SourceEnv) -> TemplateSource {
        let mut field = Map::new();
        field.insert("template".into(), json!(template));
        let ctx = Context::background();
        let mut src = TemplateSource {
            env,
            field,
            template: String::new(),
            data: Map::new(),
        };
        src.validate(&ctx).unwrap();
        src
    }

    fn history_with_response(outer: &str, name: &str, data: Value) -> EvaluationHistory {
        let mut history = EvaluationHistory::default();
        let mut resp = Response::default();
        if let Value::Object(map) = data {
            resp.data = map;
        }
        history.add_response(outer, name, resp).unwrap();
        history
    }

    #[test]
    fn renders_flattened_response_paths() {
        let env = env_with(&["template", "request", "response"], true);
        let src = source("kv/{{responses.one.data.next}}", env);
        let history = history_with_response("", "one", json!({"next": "b"}));

        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("kv/b"));
    }

    #[test]
    fn tolerates_go_style_leading_dot() {
        let env = env_with(&["template", "response"], true);
        let src = source("kv/{{.responses.one.data.next}}", env);
        let history = history_with_response("", "one", json!({"next": "b"}));

        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("kv/b"));
    }

    #[test]
    fn named_blocks_use_the_two_level_view() {
        let env = env_with(&["template", "response"], false);
        let src = source("{{responses.setup.enable.data.id}}", env);
        let history = history_with_response("setup", "enable", json!({"id": "m-1"}));

        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("m-1"));
    }

    #[test]
    fn missing_response_is_an_evaluation_error() {
        let env = env_with(&["template", "response"], true);
        let src = source("kv/{{responses.one.data.next}}", env);
        let history = EvaluationHistory::default();

        let err = src
            .evaluate(&Context::background(), &history)
            .unwrap_err();
        assert!(err.to_string().contains("responses.one.data.next"));
    }

    #[test]
    fn disabled_sources_inject_nothing() {
        let env = env_with(&["template"], true);
        let src = source("{{responses.one.data.next}}", env);
        let history = history_with_response("", "one", json!({"next": "b"}));

        assert!(src.evaluate(&Context::background(), &history).is_err());
    }

    #[test]
    fn extra_data_map_is_available() {
        let env = env_with(&["template"], true);
        let mut field = Map::new();
        field.insert("template".into(), json!("{{greeting}} world"));
        field.insert("data".into(), json!({"greeting": "hello"}));
        let mut src = TemplateSource {
            env,
            field,
            template: String::new(),
            data: Map::new(),
        };
        src.validate(&Context::background()).unwrap();

        let value = src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .unwrap();
        assert_eq!(value, json!("hello world"));
    }

    #[test]
    fn unclosed_braces_stay_literal() {
        let env = env_with(&["template"], true);
        let src = source("literal {{unclosed", env);
        let value = src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .unwrap();
        assert_eq!(value, json!("literal {{unclosed"));
    }

    #[test]
    fn missing_template_field_fails_validation() {
        let env = env_with(&["template"], true);
        let mut src = TemplateSource {
            env,
            field: Map::new(),
            template: String::new(),
            data: Map::new(),
        };
        let err = src.validate(&Context::background()).unwrap_err();
        assert!(err.to_string().contains("missing required field 'template'"));
    }
}
