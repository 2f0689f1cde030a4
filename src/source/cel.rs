//! CEL source: evaluates a CEL expression against evaluation state.
//!
//! Fields:
//!
//! - `expression` (string, required): the expression to evaluate.
//! - `variables` (list, optional): ancillary variables, each a map with
//!   exactly `name` and `expression`. Variables evaluate in declared order
//!   and each is visible to the ones after it; referencing a later variable
//!   is an evaluation error.
//!
//! The evaluation context carries the same `input` / `requests` /
//! `responses` views the template source sees, gated on the corresponding
//! sources being enabled.

use crate::constants::{SOURCE_CEL, SOURCE_INPUT, SOURCE_REQUEST, SOURCE_RESPONSE};
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::source::{required_string, Source, SourceBuilder, SourceDeps, SourceEnv};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

#[must_use]
pub fn builder() -> SourceBuilder {
    Arc::new(|_ctx, env, field| {
        Box::new(CelSource {
            env,
            field,
            compiled: None,
        })
    })
}

struct CompiledProgram {
    expression: cel::Program,
    variables: Vec<(String, cel::Program)>,
}

pub struct CelSource {
    env: SourceEnv,
    field: Map<String, Value>,
    compiled: Option<CompiledProgram>,
}

impl CelSource {
    fn parse_variables(&self) -> Result<Vec<(String, String)>, Error> {
        let raw = match self.field.get("variables") {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::validation(format!(
                    "field 'variables' is of wrong type: expected 'list' got '{other}'"
                )))
            }
        };

        let mut variables = Vec::with_capacity(raw.len());
        for (index, item) in raw.iter().enumerate() {
            let Value::Object(map) = item else {
                return Err(Error::validation(format!(
                    "field 'variables[{index}]' is of wrong type: expected 'map' got '{item}'"
                )));
            };

            let name = match map.get("name") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => {
                    return Err(Error::validation(format!(
                        "field 'variables[{index}].name' is of wrong type: \
                         expected 'string' got '{other}'"
                    )))
                }
                None => {
                    return Err(Error::validation(format!(
                        "field 'variables[{index}].name' is missing"
                    )))
                }
            };

            let expression = match map.get("expression") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => {
                    return Err(Error::validation(format!(
                        "field 'variables[{index}].expression' is of wrong type: \
                         expected 'string' got '{other}'"
                    )))
                }
                None => {
                    return Err(Error::validation(format!(
                        "field 'variables[{index}].expression' is missing"
                    )))
                }
            };

            if map.keys().any(|k| k != "name" && k != "expression") {
                return Err(Error::validation(format!(
                    "field 'variables[{index}]' has extraneous elements \
                     besides 'name' and 'expression'"
                )));
            }

            variables.push((name, expression));
        }

        Ok(variables)
    }
}

impl Source for CelSource {
    fn validate(&mut self, _ctx: &Context) -> Result<SourceDeps, Error> {
        let expr = required_string(SOURCE_CEL, &self.field, "expression")?;

        let expression = cel::Program::compile(&expr).map_err(|e| {
            Error::validation(format!("cel source failed to compile expression: {e}"))
        })?;

        let mut variables = Vec::new();
        for (name, var_expr) in self.parse_variables()? {
            let program = cel::Program::compile(&var_expr).map_err(|e| {
                Error::validation(format!(
                    "cel source failed to compile variable '{name}': {e}"
                ))
            })?;
            variables.push((name, program));
        }

        self.compiled = Some(CompiledProgram {
            expression,
            variables,
        });

        Ok(SourceDeps::default())
    }

    fn evaluate(&self, _ctx: &Context, history: &EvaluationHistory) -> Result<Value, Error> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| Error::validation("cel source evaluated before validation"))?;

        let mut cel_ctx = cel::Context::default();

        if self.env.is_enabled(SOURCE_REQUEST) {
            add_json_variable(
                &mut cel_ctx,
                "requests",
                &history.requests_value(self.env.flatten_history()),
            )?;
        }

        if self.env.is_enabled(SOURCE_RESPONSE) {
            add_json_variable(
                &mut cel_ctx,
                "responses",
                &history.responses_value(self.env.flatten_history()),
            )?;
        }

        if self.env.is_enabled(SOURCE_INPUT) {
            if let Some(input) = &self.env.input {
                add_json_variable(
                    &mut cel_ctx,
                    "input",
                    &Value::Object(input.data.raw.clone()),
                )?;
            }
        }

        for (name, program) in &compiled.variables {
            let value = program.execute(&cel_ctx).map_err(|e| {
                Error::source_eval(format!("cel variable '{name}' failed to evaluate: {e}"))
            })?;
            cel_ctx.add_variable_from_value(name.clone(), value);
        }

        let result = compiled
            .expression
            .execute(&cel_ctx)
            .map_err(|e| Error::source_eval(format!("cel source failed to evaluate: {e}")))?;

        cel_to_json(&result)
    }
}

fn add_json_variable(ctx: &mut cel::Context, name: &str, value: &Value) -> Result<(), Error> {
    let converted = cel::to_value(value)
        .map_err(|e| Error::source_eval(format!("failed to bind cel variable '{name}': {e}")))?;
    ctx.add_variable_from_value(name.to_string(), converted);
    Ok(())
}

/// Lowers a CEL result into JSON. Functions, durations, and other
/// non-data results are rejected rather than silently stringified.
fn cel_to_json(value: &cel::Value) -> Result<Value, Error> {
    use cel::objects::Key;

    Ok(match value {
        cel::Value::Null => Value::Null,
        cel::Value::Bool(b) => Value::Bool(*b),
        cel::Value::Int(i) => Value::Number((*i).into()),
        cel::Value::UInt(u) => Value::Number((*u).into()),
        cel::Value::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| Error::source_eval("cel expression produced a non-finite float"))?,
        cel::Value::String(s) => Value::String(s.to_string()),
        cel::Value::List(items) => Value::Array(
            items
                .iter()
                .map(cel_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        cel::Value::Map(map) => {
            let mut object = Map::new();
            for (key, item) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                object.insert(key, cel_to_json(item)?);
            }
            Value::Object(object)
        }
        other => {
            return Err(Error::source_eval(format!(
                "cel expression produced a non-data result: {other:?}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Response;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn env(enabled: &[&str]) -> SourceEnv {
        SourceEnv {
            outer_block_name: None,
            single_block: false,
            enabled: Arc::new(enabled.iter().map(|s| (*s).to_string()).collect::<BTreeSet<_>>()),
            input: None,
        }
    }

    fn source(env: SourceEnv, field: Map<String, Value>) -> CelSource {
        CelSource {
            env,
            field,
            compiled: None,
        }
    }

    fn validated(env: SourceEnv, field: Map<String, Value>) -> CelSource {
        let mut src = source(env, field);
        src.validate(&Context::background()).unwrap();
        src
    }

    #[test]
    fn evaluates_simple_expressions() {
        let mut field = Map::new();
        field.insert("expression".into(), json!("1 + 2"));
        let src = validated(env(&["cel"]), field);

        let value = src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .unwrap();
        assert_eq!(value, json!(3));
    }

    #[test]
    fn reads_history_responses() {
        let mut history = EvaluationHistory::default();
        let mut resp = Response::default();
        resp.data.insert("next".into(), json!("b"));
        history.add_response("", "one", resp).unwrap();

        let mut field = Map::new();
        field.insert("expression".into(), json!("'kv/' + responses.one.data.next"));
        let src = validated(env(&["cel", "response"]), field);

        let value = src.evaluate(&Context::background(), &history).unwrap();
        assert_eq!(value, json!("kv/b"));
    }

    #[test]
    fn variables_evaluate_in_declared_order() {
        let mut field = Map::new();
        field.insert("expression".into(), json!("doubled + 1"));
        field.insert(
            "variables".into(),
            json!([
                {"name": "base", "expression": "20"},
                {"name": "doubled", "expression": "base * 2"}
            ]),
        );
        let src = validated(env(&["cel"]), field);

        let value = src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .unwrap();
        assert_eq!(value, json!(41));
    }

    #[test]
    fn later_variables_are_not_visible_earlier() {
        let mut field = Map::new();
        field.insert("expression".into(), json!("early"));
        field.insert(
            "variables".into(),
            json!([
                {"name": "early", "expression": "late + 1"},
                {"name": "late", "expression": "1"}
            ]),
        );
        let src = validated(env(&["cel"]), field);

        assert!(src
            .evaluate(&Context::background(), &EvaluationHistory::default())
            .is_err());
    }

    #[test]
    fn invalid_expression_fails_validation() {
        let mut field = Map::new();
        field.insert("expression".into(), json!("1 +"));
        let mut src = source(env(&["cel"]), field);
        assert!(src.validate(&Context::background()).is_err());
    }

    #[test]
    fn extraneous_variable_keys_are_rejected() {
        let mut field = Map::new();
        field.insert("expression".into(), json!("1"));
        field.insert(
            "variables".into(),
            json!([{"name": "x", "expression": "1", "extra": true}]),
        );
        let mut src = source(env(&["cel"]), field);
        let err = src.validate(&Context::background()).unwrap_err();
        assert!(err.to_string().contains("extraneous"));
    }

    #[test]
    fn missing_expression_fails_validation() {
        let mut src = source(env(&["cel"]), Map::new());
        let err = src.validate(&Context::background()).unwrap_err();
        assert!(err.to_string().contains("expression"));
    }
}
