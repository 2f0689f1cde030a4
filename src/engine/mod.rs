//! The profile evaluation engine.
//!
//! An engine is built from a parsed profile, a set of enabled sources, and
//! an injected request handler. Evaluation walks outer blocks and requests
//! strictly in declared order; each request's fields resolve bottom-up
//! through the enabled sources against the history accumulated so far, the
//! request is dispatched, and the request (plus, on success, its response)
//! is appended to history under `(outer block, request)`.
//!
//! The engine is single-shot: no retries, no persistence, no rollback.
//! Callers needing durable orchestration should not reach for this.

pub mod convert;
pub mod history;

use crate::api::{Operation, Request, RequestHandler, Response};
use crate::config::{InputConfig, OuterConfig, OutputConfig, RequestConfig};
use crate::constants::{
    EVAL_SOURCE_KEY, EVAL_TYPE_KEY, SOURCE_CEL, SOURCE_INPUT, SOURCE_REQUEST, SOURCE_RESPONSE,
    SOURCE_TEMPLATE,
};
use crate::context::Context;
use crate::engine::convert::FieldKind;
use crate::engine::history::EvaluationHistory;
use crate::error::Error;
use crate::schema::FieldData;
use crate::source::{self, EntryRef, InputBinding, SourceBuilder, SourceEnv};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct ProfileEngine {
    sources: BTreeMap<String, SourceBuilder>,
    default_token: String,
    profile: Vec<OuterConfig>,
    outer_block_name: Option<String>,
    handler: Arc<dyn RequestHandler>,
    output: Option<OutputConfig>,
    env: SourceEnv,
    name: String,
}

impl std::fmt::Debug for ProfileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileEngine")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("default_token", &self.default_token)
            .field("profile", &self.profile)
            .field("outer_block_name", &self.outer_block_name)
            .field("output", &self.output)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ProfileEngineBuilder {
    sources: BTreeMap<String, SourceBuilder>,
    default_token: String,
    profile: Vec<OuterConfig>,
    outer_block_name: Option<String>,
    handler: Option<Arc<dyn RequestHandler>>,
    input: Option<(InputConfig, Request, FieldData)>,
    output: Option<OutputConfig>,
    name: String,
}

impl ProfileEngineBuilder {
    /// Registers a custom source under `name`.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, builder: SourceBuilder) -> Self {
        self.sources.insert(name.into(), builder);
        self
    }

    /// Enables references to previously dispatched requests.
    #[must_use]
    pub fn with_request_source(self) -> Self {
        self.with_source(SOURCE_REQUEST, source::request::builder())
    }

    /// Enables references to previously received responses.
    #[must_use]
    pub fn with_response_source(self) -> Self {
        self.with_source(SOURCE_RESPONSE, source::response::builder())
    }

    /// Enables `{{path}}` template interpolation.
    #[must_use]
    pub fn with_template_source(self) -> Self {
        self.with_source(SOURCE_TEMPLATE, source::template::builder())
    }

    /// Enables CEL expressions.
    #[must_use]
    pub fn with_cel_source(self) -> Self {
        self.with_source(SOURCE_CEL, source::cel::builder())
    }

    /// Binds a typed input schema, the originating request, and its parsed
    /// data, and enables the `input` source. All three travel together;
    /// `build` validates the data against the declared schema.
    #[must_use]
    pub fn with_input_source(
        mut self,
        config: InputConfig,
        request: Request,
        data: FieldData,
    ) -> Self {
        self.input = Some((config, request, data));
        self
    }

    /// Token used for requests whose block omits the `token` field. A
    /// present field resolving to the empty string overrides this with the
    /// empty token.
    #[must_use]
    pub fn with_default_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = token.into();
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Vec<OuterConfig>) -> Self {
        self.profile = profile;
        self
    }

    /// Names the outer block kind (`context`, `initialize`, …). Without
    /// this only a single outer block is allowed and history views use the
    /// flattened single-block convention.
    #[must_use]
    pub fn with_outer_block_name(mut self, name: impl Into<String>) -> Self {
        self.outer_block_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Display name used in engine trace output, typically the profile
    /// path.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Validates the assembled engine: name conventions and uniqueness,
    /// the outer-block requirement for multi-block profiles, input schema
    /// binding, and a static scan of every dynamic field (known sources,
    /// complete marker pairs, and history references that respect
    /// declaration order).
    ///
    /// # Errors
    ///
    /// Returns a config or validation error describing the first problem
    /// found.
    pub fn build(mut self) -> Result<ProfileEngine, Error> {
        for name in self.sources.keys() {
            if name.is_empty() {
                return Err(Error::validation("a source is missing a name"));
            }
        }

        if self.profile.len() > 1 && self.outer_block_name.is_none() {
            return Err(Error::validation(
                "must have a named outer block when providing more than one outer config",
            ));
        }

        crate::config::validate_block_names(&self.profile, self.outer_block_name.is_some())?;

        let Some(handler) = self.handler.take() else {
            return Err(Error::validation(
                "profile engine is missing a request handler; \
                 use with_handler(...) during engine construction",
            ));
        };

        let input = self.bind_input()?;

        let mut enabled: BTreeSet<String> = self.sources.keys().cloned().collect();
        if input.is_some() {
            enabled.insert(SOURCE_INPUT.to_string());
        }

        let env = SourceEnv {
            outer_block_name: self.outer_block_name.clone(),
            single_block: self.profile.len() <= 1,
            enabled: Arc::new(enabled),
            input: input.clone(),
        };

        let mut sources = self.sources;
        if let Some(binding) = input {
            sources.insert(SOURCE_INPUT.to_string(), source::input::builder(binding));
        }

        let engine = ProfileEngine {
            sources,
            default_token: self.default_token,
            profile: self.profile,
            outer_block_name: self.outer_block_name,
            handler,
            output: self.output,
            env,
            name: if self.name.is_empty() {
                "engine".to_string()
            } else {
                self.name
            },
        };

        engine.validate_dynamic_fields()?;

        Ok(engine)
    }

    fn bind_input(&mut self) -> Result<Option<Arc<InputBinding>>, Error> {
        let Some((config, request, mut data)) = self.input.take() else {
            return Ok(None);
        };

        for (index, field) in config.fields.iter().enumerate() {
            if data.schema.contains_key(&field.name) {
                return Err(Error::validation(format!(
                    "input.fields.{index} [named '{}'] already present in request schema",
                    field.name
                )));
            }
            data.schema.insert(field.name.clone(), field.to_schema());
        }

        data.validate()
            .map_err(|e| e.with_context("failed input schema validation"))?;
        data.validate_required()
            .map_err(|e| e.with_context("failed input validation"))?;

        Ok(Some(Arc::new(InputBinding {
            config,
            request,
            data,
        })))
    }
}

impl ProfileEngine {
    #[must_use]
    pub fn builder() -> ProfileEngineBuilder {
        ProfileEngineBuilder::default()
    }

    /// Evaluates the profile for its side effects.
    ///
    /// # Errors
    ///
    /// Fails when an output block is configured (use
    /// [`Self::evaluate_response`]) or when evaluation fails.
    pub async fn evaluate(&self, ctx: &Context) -> Result<(), Error> {
        if self.output.is_some() {
            return Err(Error::validation(
                "cannot call evaluate(...) when output is specified",
            ));
        }

        self.evaluate_history(ctx).await.map(|_| ())
    }

    /// Evaluates the profile and projects the final history through the
    /// output block into a response.
    ///
    /// # Errors
    ///
    /// Fails when no output block is configured or when evaluation fails.
    pub async fn evaluate_response(&self, ctx: &Context) -> Result<Response, Error> {
        let Some(output) = &self.output else {
            return Err(Error::validation(
                "cannot call evaluate_response(...) when output is not specified",
            ));
        };

        let history = self.evaluate_history(ctx).await?;
        self.evaluate_output(ctx, output, &history)
    }

    fn history_key<'a>(&self, outer: &'a OuterConfig) -> &'a str {
        if self.outer_block_name.is_none() {
            ""
        } else {
            &outer.name
        }
    }

    async fn evaluate_history(&self, ctx: &Context) -> Result<EvaluationHistory, Error> {
        let mut history = EvaluationHistory::default();

        for (outer_index, outer) in self.profile.iter().enumerate() {
            let mut block_result = Ok(());
            for (req_index, request) in outer.requests.iter().enumerate() {
                if let Err(e) = self
                    .evaluate_request(ctx, &mut history, outer_index, outer, req_index, request)
                    .await
                {
                    block_result =
                        Err(e.with_context(&format!("request.[{} ({req_index})]", request.name)));
                    break;
                }
            }

            if let Err(e) = block_result {
                return Err(match &self.outer_block_name {
                    Some(block_name) => {
                        e.with_context(&format!("{block_name}.[{} ({outer_index})]", outer.name))
                    }
                    None => e,
                });
            }
        }

        Ok(history)
    }

    async fn evaluate_request(
        &self,
        ctx: &Context,
        history: &mut EvaluationHistory,
        outer_index: usize,
        outer: &OuterConfig,
        req_index: usize,
        request: &RequestConfig,
    ) -> Result<(), Error> {
        ctx.ensure_active()?;

        let (req, allow_failure) = self
            .build_request(ctx, history, outer_index, outer, req_index, request)
            .map_err(|e| e.with_context("in building request"))?;

        trace!(
            target: "cascade::engine",
            engine = %self.name,
            request_id = %req.id,
            operation = %req.operation,
            path = %req.path,
            "dispatching profile request"
        );

        let outcome = self.handler.handle(ctx, req.clone()).await;

        // Cancellation is never swallowed, not even under allow_failure.
        if ctx.is_cancelled() {
            return Err(Error::cancelled());
        }

        let (failure, response) = match outcome {
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => (Some(e), None),
            Ok(resp) => match resp.to_error() {
                Some(e) => (Some(e), None),
                None => (None, Some(resp)),
            },
        };

        if let Some(err) = failure {
            if !allow_failure {
                return Err(Error::dispatch(format!(
                    "failed to evaluate request: {err}"
                )));
            }
            debug!(
                target: "cascade::engine",
                engine = %self.name,
                request_id = %req.id,
                error = %err,
                "request failed, continuing under allow_failure"
            );
        }

        let outer_key = self.history_key(outer).to_string();
        history
            .add_request(&outer_key, &request.name, req)
            .map_err(|e| e.with_context("failed to save request"))?;

        if let Some(resp) = response {
            history
                .add_response(&outer_key, &request.name, resp)
                .map_err(|e| e.with_context("failed to save response"))?;
        }

        Ok(())
    }

    fn build_request(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        outer_index: usize,
        outer: &OuterConfig,
        req_index: usize,
        request: &RequestConfig,
    ) -> Result<(Request, bool), Error> {
        let mut id = format!("request[{req_index}].{}", request.name);
        if let Some(block_name) = &self.outer_block_name {
            id = format!("{block_name}[{outer_index}].{}.{id}", outer.name);
        }

        let operation = self
            .resolve_to_string(ctx, history, request.operation.as_ref())
            .map_err(|e| e.with_context("failed to evaluate operation"))?;

        let path = self
            .resolve_to_string(ctx, history, request.path.as_ref())
            .map_err(|e| e.with_context("failed to evaluate path"))?;

        // An omitted token means the engine default; a token field that
        // resolves to the empty string is an explicit empty override.
        let client_token = match request.token.as_ref() {
            None => self.default_token.clone(),
            token => self
                .resolve_to_string(ctx, history, token)
                .map_err(|e| e.with_context("failed to evaluate token"))?,
        };

        let data = {
            let resolved = self
                .resolve(ctx, history, request.data.as_ref())
                .map_err(|e| e.with_context("failed to evaluate data"))?;
            convert::to_map(&resolved)
                .map_err(|e| Error::config(format!("failed to evaluate data: {e}")))?
        };

        let allow_failure = {
            let resolved = self
                .resolve(ctx, history, request.allow_failure.as_ref())
                .map_err(|e| e.with_context("failed to evaluate allow_failure"))?;
            convert::to_bool(&resolved)
                .map_err(|e| Error::config(format!("failed to evaluate allow_failure: {e}")))?
        };

        let req = Request {
            id,
            operation: Operation::from(operation),
            path,
            client_token,
            data,
        };

        Ok((req, allow_failure))
    }

    fn resolve(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        value: Option<&Value>,
    ) -> Result<Value, Error> {
        value.map_or(Ok(Value::Null), |v| self.evaluate_field(ctx, history, v))
    }

    fn resolve_to_string(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        value: Option<&Value>,
    ) -> Result<String, Error> {
        let resolved = self.resolve(ctx, history, value)?;
        convert::to_string(&resolved).map_err(Error::config)
    }

    /// Resolves one configuration value bottom-up. Maps are checked for the
    /// marker pair after their values resolve; lists of maps are collapsed
    /// (a parser artifact; conflicting duplicate keys abort); plain lists
    /// resolve element-wise; scalars pass through.
    pub fn evaluate_field(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        value: &Value,
    ) -> Result<Value, Error> {
        match value {
            Value::Object(map) => self.maybe_evaluate_typed(ctx, history, map),
            Value::Array(items)
                if !items.is_empty() && items.iter().all(Value::is_object) =>
            {
                let collapsed = collapse_object_list(items)?;
                self.maybe_evaluate_typed(ctx, history, &collapsed)
            }
            Value::Array(items) => {
                let mut results = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let resolved = self
                        .evaluate_field(ctx, history, item)
                        .map_err(|e| e.with_context(&format!("list.{index}")))?;
                    results.push(resolved);
                }
                Ok(Value::Array(results))
            }
            other => Ok(other.clone()),
        }
    }

    fn maybe_evaluate_typed(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        map: &Map<String, Value>,
    ) -> Result<Value, Error> {
        let (source_name, type_tag) = read_markers(map)?;

        // Resolution is strictly bottom-up: inner sources resolve before
        // the outer source sees them, so evaluation order is predetermined
        // and no key can be net-created.
        let mut resolved = Map::with_capacity(map.len());
        for (key, inner) in map {
            let value = self
                .evaluate_field(ctx, history, inner)
                .map_err(|e| e.with_context(&format!("while evaluating map.{key}")))?;
            resolved.insert(key.clone(), value);
        }

        let Some((source_name, type_tag)) = source_name.zip(type_tag) else {
            return Ok(Value::Object(resolved));
        };

        self.evaluate_typed(ctx, history, resolved, &source_name, &type_tag)
    }

    fn evaluate_typed(
        &self,
        ctx: &Context,
        history: &EvaluationHistory,
        field: Map<String, Value>,
        source_name: &str,
        type_tag: &str,
    ) -> Result<Value, Error> {
        let Some(builder) = self.sources.get(source_name) else {
            return Err(Error::config(format!(
                "unknown value for '{EVAL_SOURCE_KEY}': {source_name}"
            )));
        };

        let mut source = builder(ctx, self.env.clone(), field);

        let result = (|| {
            let deps = source.validate(ctx).map_err(|e| {
                e.with_context(&format!("failed to validate source '{source_name}'"))
            })?;

            for name in deps.requests.iter().chain(deps.responses.iter()) {
                if name.is_empty() {
                    return Err(Error::validation(
                        "invalid empty history entry name found",
                    ));
                }
            }

            let value = source.evaluate(ctx, history).map_err(|e| {
                e.with_context(&format!("failed to evaluate source '{source_name}'"))
            })?;

            convert_tagged(value, type_tag)
        })();

        if let Err(close_err) = source.close(ctx) {
            debug!(
                target: "cascade::engine",
                engine = %self.name,
                source = source_name,
                error = %close_err,
                "source close failed"
            );
        }

        result
    }

    fn evaluate_output(
        &self,
        ctx: &Context,
        output: &OutputConfig,
        history: &EvaluationHistory,
    ) -> Result<Response, Error> {
        let mut response = Response::default();

        if let Some(data) = &output.data {
            let resolved = self
                .evaluate_field(ctx, history, data)
                .map_err(|e| e.with_context("failed to evaluate output data"))?;
            response.data = convert::to_map(&resolved)
                .map_err(|e| Error::config(format!("failed to evaluate output data: {e}")))?;
        }

        for (header, exprs) in &output.headers {
            let mut values = Vec::with_capacity(exprs.len());
            for (index, expr) in exprs.iter().enumerate() {
                let resolved = self.evaluate_field(ctx, history, expr).map_err(|e| {
                    e.with_context(&format!(
                        "failed to evaluate response header [{header}/{index}]"
                    ))
                })?;
                let value = convert::to_string(&resolved).map_err(|e| {
                    Error::config(format!(
                        "failed to evaluate response header [{header}/{index}]: {e}"
                    ))
                })?;
                values.push(value);
            }
            response.headers.insert(header.clone(), values);
        }

        Ok(response)
    }

    // ── Static validation of dynamic fields ─────────────────────────────

    /// Scans every dynamic field in the profile without dispatching
    /// anything: markers must pair up, sources must be registered and
    /// structurally valid, type tags must parse, and declared history
    /// references must point at requests declared strictly earlier.
    fn validate_dynamic_fields(&self) -> Result<(), Error> {
        let mut positions: HashMap<(String, String), usize> = HashMap::new();
        let mut sequence = 0usize;
        for outer in &self.profile {
            let outer_key = self.history_key(outer).to_string();
            for request in &outer.requests {
                positions.insert((outer_key.clone(), request.name.clone()), sequence);
                sequence += 1;
            }
        }

        for (outer_index, outer) in self.profile.iter().enumerate() {
            let outer_key = self.history_key(outer);
            for (req_index, request) in outer.requests.iter().enumerate() {
                let position = positions[&(outer_key.to_string(), request.name.clone())];
                let fields = [
                    ("operation", request.operation.as_ref()),
                    ("path", request.path.as_ref()),
                    ("token", request.token.as_ref()),
                    ("data", request.data.as_ref()),
                    ("allow_failure", request.allow_failure.as_ref()),
                ];
                for (field_name, value) in fields {
                    let Some(value) = value else { continue };
                    self.scan_field(value, outer_key, Some(position), &positions)
                        .map_err(|e| {
                            e.with_context(&format!(
                                "{}.{outer_index}.request.{req_index}.{field_name}",
                                self.outer_block_name.as_deref().unwrap_or("profile")
                            ))
                        })?;
                }
            }
        }

        if let Some(output) = &self.output {
            if let Some(data) = &output.data {
                self.scan_field(data, "", None, &positions)
                    .map_err(|e| e.with_context("output.data"))?;
            }
            for (header, exprs) in &output.headers {
                for (index, expr) in exprs.iter().enumerate() {
                    self.scan_field(expr, "", None, &positions)
                        .map_err(|e| e.with_context(&format!("output.headers.{header}.{index}")))?;
                }
            }
        }

        Ok(())
    }

    fn scan_field(
        &self,
        value: &Value,
        current_outer: &str,
        position: Option<usize>,
        positions: &HashMap<(String, String), usize>,
    ) -> Result<(), Error> {
        match value {
            Value::Object(map) => self.scan_map(map, current_outer, position, positions),
            Value::Array(items)
                if !items.is_empty() && items.iter().all(Value::is_object) =>
            {
                let collapsed = collapse_object_list(items)?;
                self.scan_map(&collapsed, current_outer, position, positions)
            }
            Value::Array(items) => {
                for item in items {
                    self.scan_field(item, current_outer, position, positions)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn scan_map(
        &self,
        map: &Map<String, Value>,
        current_outer: &str,
        position: Option<usize>,
        positions: &HashMap<(String, String), usize>,
    ) -> Result<(), Error> {
        let markers = read_markers(map)?;

        let mut has_nested_dynamic = false;
        for (key, inner) in map {
            if key == EVAL_SOURCE_KEY || key == EVAL_TYPE_KEY {
                continue;
            }
            if contains_markers(inner) {
                has_nested_dynamic = true;
            }
            self.scan_field(inner, current_outer, position, positions)?;
        }

        let Some((source_name, type_tag)) = markers.0.zip(markers.1) else {
            return Ok(());
        };

        if !type_tag.is_empty() {
            FieldKind::parse(&type_tag).map_err(Error::config)?;
        }

        let Some(builder) = self.sources.get(source_name.as_str()) else {
            return Err(Error::config(format!(
                "unknown value for '{EVAL_SOURCE_KEY}': {source_name}"
            )));
        };

        // A field whose inner values are themselves dynamic cannot be
        // structurally validated until those resolve; its own validation
        // happens at evaluation time.
        if has_nested_dynamic {
            return Ok(());
        }

        let scan_ctx = Context::background();
        let mut source = builder(&scan_ctx, self.env.clone(), map.clone());
        let deps = source
            .validate(&scan_ctx)
            .map_err(|e| e.with_context(&format!("failed to validate source '{source_name}'")))?;
        let _ = source.close(&scan_ctx);

        for (dep, is_response) in deps
            .requests
            .iter()
            .map(|d| (d, false))
            .chain(deps.responses.iter().map(|d| (d, true)))
        {
            let entry = EntryRef::parse(dep)?;
            let outer_key = entry
                .outer
                .clone()
                .unwrap_or_else(|| current_outer.to_string());
            let what = if is_response { "response" } else { "request" };

            let Some(&dep_position) = positions.get(&(outer_key, entry.name.clone())) else {
                return Err(Error::validation(format!(
                    "source '{source_name}' references unknown {what} '{}'",
                    entry.display()
                )));
            };

            if let Some(position) = position {
                if dep_position >= position {
                    return Err(Error::validation(format!(
                        "source '{source_name}' references {what} '{}' that is not \
                         dispatched until later in the profile",
                        entry.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Reads the `eval_source` / `eval_type` pair off a map. Present-exactly-one
/// is a fatal configuration fault; both must be strings.
fn read_markers(map: &Map<String, Value>) -> Result<(Option<String>, Option<String>), Error> {
    let source = map.get(EVAL_SOURCE_KEY);
    let type_tag = map.get(EVAL_TYPE_KEY);

    if source.is_some() != type_tag.is_some() {
        return Err(Error::config(format!(
            "malformed object; missing either '{EVAL_TYPE_KEY}' or '{EVAL_SOURCE_KEY}'"
        )));
    }

    let as_string = |key: &str, value: Option<&Value>| -> Result<Option<String>, Error> {
        match value {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(Error::config(format!(
                "malformed object; '{key}' was of wrong type; expected 'string' got '{other}'"
            ))),
        }
    };

    Ok((
        as_string(EVAL_SOURCE_KEY, source)?,
        as_string(EVAL_TYPE_KEY, type_tag)?,
    ))
}

fn contains_markers(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(EVAL_SOURCE_KEY)
                || map.contains_key(EVAL_TYPE_KEY)
                || map.values().any(contains_markers)
        }
        Value::Array(items) => items.iter().any(contains_markers),
        _ => false,
    }
}

/// Collapses a list of maps into one map. The form is a parser artifact of
/// merging similarly-keyed entries; genuinely conflicting values for the
/// same key indicate a parser bug and abort with a diagnostic.
fn collapse_object_list(items: &[Value]) -> Result<Map<String, Value>, Error> {
    let mut collapsed = Map::new();
    for (index, item) in items.iter().enumerate() {
        let Value::Object(map) = item else { continue };
        for (key, value) in map {
            if let Some(existing) = collapsed.get(key) {
                if existing != value {
                    return Err(Error::config(format!(
                        "bug in profile evaluation: at index {index} in collapsing object, \
                         duplicate key '{key}' ({existing} != {value})"
                    )));
                }
            }
            collapsed.insert(key.clone(), value.clone());
        }
    }
    Ok(collapsed)
}

fn convert_tagged(value: Value, type_tag: &str) -> Result<Value, Error> {
    if type_tag.is_empty() {
        return Ok(value);
    }

    let kind = FieldKind::parse(type_tag).map_err(Error::config)?;
    convert::coerce(&value, kind).map_err(|_| {
        Error::config(format!(
            "conversion-error: cannot convert value to type '{type_tag}'"
        ))
    })
}
