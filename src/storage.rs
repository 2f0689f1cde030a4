//! Storage abstraction consumed by the profile store.
//!
//! The host's encrypted barrier is out of scope; the store sees it through
//! the [`Storage`] trait plus [`StorageView`], a prefix wrapper that works
//! like a chroot: everything a view reads or writes is confined to its
//! prefix, and `sub_view` nests further. Keys ending in `/` are directory
//! markers in single-level listings.

use crate::context::Context;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>, Error>;

    async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>) -> Result<(), Error>;

    async fn delete(&self, ctx: &Context, key: &str) -> Result<(), Error>;

    /// Direct children of `prefix`, relative to it, sorted: leaf keys plus
    /// `child/` markers for sub-trees. `after` is an exclusive lower bound;
    /// `limit` caps the page size.
    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &str,
        after: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, Error>;
}

/// A prefixed window onto a [`Storage`].
#[derive(Clone)]
pub struct StorageView {
    storage: Arc<dyn Storage>,
    prefix: String,
}

impl StorageView {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn sub_view(&self, prefix: &str) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            prefix: format!("{}{prefix}", self.prefix),
        }
    }

    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    pub async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.storage.get(ctx, &format!("{}{key}", self.prefix)).await
    }

    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    pub async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.storage
            .put(ctx, &format!("{}{key}", self.prefix), value)
            .await
    }

    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    pub async fn delete(&self, ctx: &Context, key: &str) -> Result<(), Error> {
        self.storage
            .delete(ctx, &format!("{}{key}", self.prefix))
            .await
    }

    /// # Errors
    ///
    /// Propagates the underlying storage failure.
    pub async fn list_page(
        &self,
        ctx: &Context,
        prefix: &str,
        after: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, Error> {
        self.storage
            .list_page(ctx, &format!("{}{prefix}", self.prefix), after, limit)
            .await
    }
}

/// Walks a view depth-first and returns every leaf key, relative to the
/// view, in sorted order.
///
/// # Errors
///
/// Propagates the underlying storage failure.
pub async fn scan_view(view: &StorageView, ctx: &Context) -> Result<Vec<String>, Error> {
    let mut keys = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(prefix) = pending.pop() {
        let children = view.list_page(ctx, &prefix, "", None).await?;
        for child in children {
            let full = format!("{prefix}{child}");
            if child.ends_with('/') {
                pending.push(full);
            } else {
                keys.push(full);
            }
        }
    }

    keys.sort();
    Ok(keys)
}

/// In-memory storage backend for embedding and tests.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>, Error> {
        ctx.ensure_active()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>) -> Result<(), Error> {
        ctx.ensure_active()?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<(), Error> {
        ctx.ensure_active()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_page(
        &self,
        ctx: &Context,
        prefix: &str,
        after: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, Error> {
        ctx.ensure_active()?;
        let entries = self.entries.read().await;

        let mut children: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(relative) = key.strip_prefix(prefix) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }

            // Collapse deeper keys into a single directory marker.
            let child = match relative.find('/') {
                Some(slash) => &relative[..=slash],
                None => relative,
            };

            if child <= after && !after.is_empty() {
                continue;
            }
            if children.last().map(String::as_str) != Some(child) {
                children.push(child.to_string());
            }
        }

        if let Some(limit) = limit {
            children.truncate(limit);
        }

        Ok(children)
    }
}
