//! Endpoint wiring for the profile subsystem.
//!
//! [`ProfileBackend`] dispatches the crate's request model under the
//! `profiles/` route space: management (list/scan/read/write/delete) and
//! execution, with the unauthenticated execution route registered only when
//! the backend is constructed with it enabled. The real HTTP layer is the
//! host's concern; this module only maps routes and operations onto the
//! store and shapes the responses.

use crate::api::{Operation, Request, Response};
use crate::constants::{ROUTE_EXECUTE, ROUTE_MANAGE, ROUTE_UNAUTHED_EXECUTE};
use crate::context::Context;
use crate::engine::convert::FieldKind;
use crate::error::Error;
use crate::schema::{FieldData, FieldSchema};
use crate::store::{ProfileEntry, ProfileStore};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub struct ProfileBackend {
    store: Arc<ProfileStore>,
    allow_unauthenticated: bool,
}

impl ProfileBackend {
    #[must_use]
    pub fn new(store: Arc<ProfileStore>, allow_unauthenticated: bool) -> Self {
        Self {
            store,
            allow_unauthenticated,
        }
    }

    /// Routes a request to the matching handler.
    ///
    /// # Errors
    ///
    /// Unknown routes and unsupported operations fail as not-found; handler
    /// errors propagate unchanged.
    pub async fn handle(&self, ctx: &Context, req: &Request) -> Result<Response, Error> {
        if let Some(path) = req.path.strip_prefix(ROUTE_MANAGE) {
            return self.handle_manage(ctx, req, path).await;
        }

        if let Some(path) = req.path.strip_prefix(ROUTE_EXECUTE) {
            return self.handle_execute(ctx, req, path, false).await;
        }

        if let Some(path) = req.path.strip_prefix(ROUTE_UNAUTHED_EXECUTE) {
            // The route simply does not exist unless the host enabled it.
            if !self.allow_unauthenticated {
                return Err(Error::not_found(&req.path));
            }
            return self.handle_execute(ctx, req, path, true).await;
        }

        Err(Error::not_found(&req.path))
    }

    async fn handle_manage(
        &self,
        ctx: &Context,
        req: &Request,
        path: &str,
    ) -> Result<Response, Error> {
        match req.operation {
            Operation::List => self.handle_list(ctx, req, path, false).await,
            Operation::Scan => self.handle_list(ctx, req, path, true).await,
            Operation::Read if !path.is_empty() => self.handle_read(ctx, path).await,
            Operation::Write if !path.is_empty() => self.handle_update(ctx, req, path).await,
            Operation::Delete if !path.is_empty() => self.handle_delete(ctx, path).await,
            _ => Err(Error::not_found(&req.path)),
        }
    }

    async fn handle_list(
        &self,
        ctx: &Context,
        req: &Request,
        prefix: &str,
        recursive: bool,
    ) -> Result<Response, Error> {
        let data = list_field_data(req);
        data.validate()?;

        let after = data
            .get_ok("after")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let limit = data
            .get_ok("limit")
            .and_then(|v| v.as_i64())
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0);

        let entries = self
            .store
            .list(ctx, prefix, recursive, &after, limit)
            .await?;

        let mut keys = Vec::with_capacity(entries.len());
        let mut key_info = Map::new();
        for entry in &entries {
            keys.push(Value::String(entry.path.clone()));
            key_info.insert(entry.path.clone(), Value::Object(entry_data(entry)));
        }

        let mut body = Map::new();
        body.insert("keys".into(), Value::Array(keys));
        body.insert("key_info".into(), Value::Object(key_info));
        Ok(Response::with_data(body))
    }

    async fn handle_read(&self, ctx: &Context, path: &str) -> Result<Response, Error> {
        let entry = self
            .store
            .get(ctx, path)
            .await?
            .ok_or_else(|| Error::not_found(path))?;
        Ok(Response::with_data(entry_data(&entry)))
    }

    async fn handle_update(
        &self,
        ctx: &Context,
        req: &Request,
        path: &str,
    ) -> Result<Response, Error> {
        let data = update_field_data(req);
        data.validate()?;
        data.validate_required()?;

        let cas = data.get_ok("cas").and_then(|v| v.as_i64());

        let entry = ProfileEntry {
            path: path.to_string(),
            profile: data
                .get("profile")
                .as_str()
                .unwrap_or_default()
                .to_string(),
            description: data
                .get("description")
                .as_str()
                .unwrap_or_default()
                .to_string(),
            version: 0,
            cas_required: data.get("cas_required").as_bool().unwrap_or_default(),
            allow_unauthenticated: data
                .get("allow_unauthenticated")
                .as_bool()
                .unwrap_or_default(),
        };

        let stored = self.store.set(ctx, entry, cas).await?;
        Ok(Response::with_data(entry_data(&stored)))
    }

    async fn handle_delete(&self, ctx: &Context, path: &str) -> Result<Response, Error> {
        self.store.delete(ctx, path).await?;
        // Empty response; hosts render this as 204 No Content.
        Ok(Response::default())
    }

    async fn handle_execute(
        &self,
        ctx: &Context,
        req: &Request,
        path: &str,
        unauthed: bool,
    ) -> Result<Response, Error> {
        if path.is_empty() {
            return Err(Error::not_found(&req.path));
        }
        if req.operation != Operation::Write {
            return Err(Error::not_found(&req.path));
        }

        // Execution takes arbitrary input: the body is handed to the
        // engine unvalidated and the profile's own input schema takes over.
        let data = FieldData::new(IndexMap::new(), req.data.clone());

        let response = self.store.execute(ctx, path, unauthed, req, &data).await?;
        Ok(response.unwrap_or_default())
    }
}

fn entry_data(entry: &ProfileEntry) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("path".into(), json!(entry.path));
    data.insert("profile".into(), json!(entry.profile));
    data.insert("description".into(), json!(entry.description));
    data.insert("version".into(), json!(entry.version));
    data.insert("cas_required".into(), json!(entry.cas_required));
    data.insert(
        "allow_unauthenticated".into(),
        json!(entry.allow_unauthenticated),
    );
    data
}

fn list_field_data(req: &Request) -> FieldData {
    let mut schema = IndexMap::new();
    schema.insert(
        "after".to_string(),
        FieldSchema {
            field_type: FieldKind::String,
            description: "Optional entry to begin listing after; \
                          not required to exist."
                .into(),
            ..FieldSchema::default()
        },
    );
    schema.insert(
        "limit".to_string(),
        FieldSchema {
            field_type: FieldKind::Int,
            description: "Optional number of entries to return; \
                          defaults to all entries."
                .into(),
            ..FieldSchema::default()
        },
    );
    FieldData::new(schema, req.data.clone())
}

fn update_field_data(req: &Request) -> FieldData {
    let mut schema = IndexMap::new();
    schema.insert(
        "profile".to_string(),
        FieldSchema {
            field_type: FieldKind::String,
            required: true,
            description: "Profile definition in either HCL or JSON format.".into(),
            ..FieldSchema::default()
        },
    );
    schema.insert(
        "description".to_string(),
        FieldSchema {
            field_type: FieldKind::String,
            description: "Profile description.".into(),
            ..FieldSchema::default()
        },
    );
    schema.insert(
        "cas".to_string(),
        FieldSchema {
            field_type: FieldKind::Int,
            description: "Check-and-set version of the profile.".into(),
            ..FieldSchema::default()
        },
    );
    schema.insert(
        "cas_required".to_string(),
        FieldSchema {
            field_type: FieldKind::Bool,
            description: "Whether to require check-and-set for modifying \
                          this profile."
                .into(),
            ..FieldSchema::default()
        },
    );
    schema.insert(
        "allow_unauthenticated".to_string(),
        FieldSchema {
            field_type: FieldKind::Bool,
            description: "Whether this profile can be executed \
                          unauthenticated. Use with care."
                .into(),
            ..FieldSchema::default()
        },
    );
    FieldData::new(schema, req.data.clone())
}
