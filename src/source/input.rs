//! Input source: reads a validated caller-supplied field.
//!
//! Fields:
//!
//! - `field_name` (string, required): the input field to read.
//!
//! Whether the field must be present is a property of the declared input
//! schema (`required = true`), enforced at engine construction; reads here
//! go through the bound [`crate::schema::FieldData`] and therefore see
//! defaults and weak typing.

use crate::constants::SOURCE_INPUT;
use crate::context::Context;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::source::{required_string, InputBinding, Source, SourceBuilder, SourceDeps};
use serde_json::{Map, Value};
use std::sync::Arc;

#[must_use]
pub fn builder(binding: Arc<InputBinding>) -> SourceBuilder {
    Arc::new(move |_ctx, _env, field| {
        Box::new(InputSource {
            binding: Arc::clone(&binding),
            field,
            field_name: String::new(),
        })
    })
}

pub struct InputSource {
    binding: Arc<InputBinding>,
    field: Map<String, Value>,
    field_name: String,
}

impl Source for InputSource {
    fn validate(&mut self, _ctx: &Context) -> Result<SourceDeps, Error> {
        let field_name = required_string(SOURCE_INPUT, &self.field, "field_name")?;

        if !self.binding.data.schema.contains_key(&field_name) {
            return Err(Error::validation(format!(
                "referenced field '{field_name}' is missing from schema"
            )));
        }

        self.field_name = field_name;
        Ok(SourceDeps::default())
    }

    fn evaluate(&self, _ctx: &Context, _history: &EvaluationHistory) -> Result<Value, Error> {
        Ok(self.binding.data.get(&self.field_name))
    }
}
