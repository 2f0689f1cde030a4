//! The profile store: CAS-versioned, namespaced persistence for profile
//! documents, plus the execution entry point that binds a stored document
//! to an engine.
//!
//! All operations run under one `RwLock`: reads and executions share the
//! read lock, writes and deletes take the write lock. The sticky
//! `cas_required` flag is enforced under the write lock so a racing writer
//! cannot unset it.

use crate::api::{Request, RequestHandler, Response};
use crate::config::ProfileDocument;
use crate::constants::{NAMESPACE_SUB_PATH, PROFILE_SUB_PATH, STORE_OUTER_BLOCK};
use crate::context::{Context, Namespace};
use crate::engine::ProfileEngine;
use crate::error::Error;
use crate::schema::FieldData;
use crate::storage::{scan_view, StorageView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// A persisted profile record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileEntry {
    pub path: String,
    pub profile: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub cas_required: bool,
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

impl ProfileEntry {
    /// Parses the stored document into its typed configuration.
    ///
    /// # Errors
    ///
    /// Propagates document and configuration parse errors.
    pub fn parse(&self) -> Result<ProfileDocument, Error> {
        ProfileDocument::parse(&self.profile, STORE_OUTER_BLOCK)
    }
}

pub struct ProfileStore {
    view: StorageView,
    handler: Arc<dyn RequestHandler>,
    lock: RwLock<()>,
}

impl ProfileStore {
    /// `view` is the host's system storage view; profile entries live under
    /// its `profiles/` sub-path per namespace. `handler` routes profile
    /// requests through the host's authorization stack.
    #[must_use]
    pub fn new(view: StorageView, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            view,
            handler,
            lock: RwLock::new(()),
        }
    }

    fn sanitize_path(path: &str) -> String {
        path.trim().to_lowercase()
    }

    fn namespace_view(&self, ns: &Namespace) -> StorageView {
        if ns.is_root() {
            return self.view.sub_view(PROFILE_SUB_PATH);
        }
        self.view
            .sub_view(&format!("{NAMESPACE_SUB_PATH}{}/{PROFILE_SUB_PATH}", ns.id))
    }

    /// # Errors
    ///
    /// Propagates storage and decode failures; a missing entry is `None`.
    pub async fn get(&self, ctx: &Context, path: &str) -> Result<Option<ProfileEntry>, Error> {
        let _guard = self.lock.read().await;
        self.get_locked(ctx, path).await
    }

    async fn get_locked(&self, ctx: &Context, path: &str) -> Result<Option<ProfileEntry>, Error> {
        let ns = ctx.namespace_or_root();
        let path = Self::sanitize_path(path);
        let view = self.namespace_view(&ns);

        let Some(raw) = view
            .get(ctx, &path)
            .await
            .map_err(|e| e.with_context("failed to read profile"))?
        else {
            return Ok(None);
        };

        let entry: ProfileEntry = serde_json::from_slice(&raw)
            .map_err(|e| Error::storage(format!("failed to decode profile: {e}")))?;
        Ok(Some(entry))
    }

    /// Check-and-set write. When the stored entry or the incoming one has
    /// `cas_required`, a CAS value must be supplied. `cas == -1` means the
    /// entry must not exist; any other value must equal the current
    /// version. The persisted version is store-managed: 0 on create,
    /// incremented on every successful write. `cas_required` is sticky:
    /// a write cannot clear it once persisted.
    ///
    /// # Errors
    ///
    /// Returns a config error for unparsable documents, a CAS violation on
    /// rule breaches, and storage errors otherwise.
    pub async fn set(
        &self,
        ctx: &Context,
        entry: ProfileEntry,
        cas: Option<i64>,
    ) -> Result<ProfileEntry, Error> {
        let ns = ctx.namespace_or_root();
        let path = Self::sanitize_path(&entry.path);
        let view = self.namespace_view(&ns);

        // Malformed documents are rejected at write time so a bad profile
        // never sits in storage waiting to fail at execution.
        entry
            .parse()
            .map_err(|e| e.with_context("failed to parse profile"))?;

        let _guard = self.lock.write().await;

        let existing = self.get_locked(ctx, &path).await?;

        let cas_required =
            existing.as_ref().is_some_and(|e| e.cas_required) || entry.cas_required;
        if cas.is_none() && cas_required {
            return Err(Error::cas_violation(
                "check-and-set parameter required for this call",
            ));
        }

        if let Some(cas) = cas {
            if cas == -1 {
                if existing.is_some() {
                    return Err(Error::cas_violation(
                        "check-and-set parameter set to -1 on existing entry",
                    ));
                }
            } else if existing.as_ref().map(|e| e.version) != Some(cas) {
                return Err(Error::cas_violation(
                    "check-and-set parameter did not match the current version",
                ));
            }
        }

        let stored = ProfileEntry {
            path: path.clone(),
            version: existing.as_ref().map_or(0, |e| e.version + 1),
            cas_required,
            ..entry
        };

        let encoded = serde_json::to_vec(&stored)
            .map_err(|e| Error::storage(format!("failed to encode profile: {e}")))?;
        view.put(ctx, &path, encoded)
            .await
            .map_err(|e| e.with_context("failed to write profile"))?;

        debug!(
            target: "cascade::store",
            path = %path,
            version = stored.version,
            "profile written"
        );

        Ok(stored)
    }

    /// # Errors
    ///
    /// Propagates storage failures. Deleting a missing entry succeeds.
    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<(), Error> {
        let ns = ctx.namespace_or_root();
        let path = Self::sanitize_path(path);
        let view = self.namespace_view(&ns);

        let _guard = self.lock.write().await;
        view.delete(ctx, &path).await
    }

    /// Lists entries under `prefix`, fully populated. Non-recursive calls
    /// page a single level starting after `after` up to `limit`; recursive
    /// calls scan the whole sub-tree and ignore `limit`. Directory markers
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        recursive: bool,
        after: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ProfileEntry>, Error> {
        let ns = ctx.namespace_or_root();
        let mut prefix = Self::sanitize_path(prefix);
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let view = self.namespace_view(&ns).sub_view(&prefix);

        let _guard = self.lock.read().await;

        let keys = if recursive {
            scan_view(&view, ctx).await?
        } else {
            view.list_page(ctx, "", after, limit).await?
        };

        let mut results = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            if key.ends_with('/') {
                continue;
            }
            let path = format!("{prefix}{key}");
            let entry = self.get_locked(ctx, &path).await.map_err(|e| {
                e.with_context(&format!("failed to fetch profile ({index}/{path}) in list"))
            })?;
            if let Some(entry) = entry {
                results.push(entry);
            }
        }

        Ok(results)
    }

    /// Loads, parses, and runs a profile. `req` is the originating request
    /// (its token becomes the engine default; its parsed `data` backs the
    /// `input` source). Unauthenticated execution of a missing or
    /// non-unauthenticated profile fails with one indistinguishable
    /// permission error. Returns `None` for profiles without an output
    /// block.
    ///
    /// # Errors
    ///
    /// Permission, not-found, parse, engine-construction, and evaluation
    /// failures, in that order of detection.
    pub async fn execute(
        &self,
        ctx: &Context,
        path: &str,
        unauthed: bool,
        req: &Request,
        data: &FieldData,
    ) -> Result<Option<Response>, Error> {
        let _guard = self.lock.read().await;

        let entry = self
            .get_locked(ctx, path)
            .await
            .map_err(|e| e.with_context("failed to execute profile"))?;

        // Permission denied is preferred over not-found for unauthed
        // callers: the endpoint must not reveal whether the profile exists.
        if unauthed && entry.as_ref().is_none_or(|e| !e.allow_unauthenticated) {
            return Err(Error::permission_denied());
        }

        let Some(entry) = entry else {
            return Err(Error::not_found(path));
        };

        trace!(
            target: "cascade::store",
            path = %entry.path,
            version = entry.version,
            "executing profile"
        );

        let parsed = entry
            .parse()
            .map_err(|e| e.with_context("failed to parse profile"))?;

        let ns = ctx.namespace_or_root();
        let has_output = parsed.output.is_some();

        // Sources that could bypass the host's authorization (environment,
        // files) are deliberately not enabled on stored profiles.
        let mut builder = ProfileEngine::builder()
            .with_request_source()
            .with_response_source()
            .with_template_source()
            .with_outer_block_name(STORE_OUTER_BLOCK)
            .with_profile(parsed.outers)
            .with_default_token(req.client_token.clone())
            .with_name(format!("{}{}", ns.path, entry.path))
            .with_handler(Arc::clone(&self.handler));

        if let Some(input) = parsed.input {
            builder = builder.with_input_source(input, req.clone(), data.clone());
        }
        if let Some(output) = parsed.output {
            builder = builder.with_output(output);
        }

        let engine = builder
            .build()
            .map_err(|e| e.with_context("failed building profile engine"))?;

        // The namespace is resolved here, at the trust boundary; the engine
        // runs without one so handler dispatch cannot escalate into a
        // parent namespace through context reuse.
        let engine_ctx = ctx.without_namespace();

        if has_output {
            return engine.evaluate_response(&engine_ctx).await.map(Some);
        }

        engine
            .evaluate(&engine_ctx)
            .await
            .map_err(|e| e.with_context("failed to evaluate profile"))?;
        Ok(None)
    }
}
