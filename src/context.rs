//! Evaluation context: namespace identity and cooperative cancellation.
//!
//! A [`Context`] travels from the outer entry point through the store, the
//! engine, every source, and the injected request handler. Cancelling the
//! token aborts the evaluation at the next request boundary; sources and
//! handlers may also observe it mid-operation.

use crate::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identity of the namespace a request executes under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: String,
    pub path: String,
}

impl Namespace {
    /// The root namespace has an empty storage path.
    #[must_use]
    pub fn root() -> Self {
        Self {
            id: "root".into(),
            path: String::new(),
        }
    }

    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    namespace: Option<Arc<Namespace>>,
    cancel: CancellationToken,
}

impl Context {
    /// A context with no namespace and a fresh cancellation token.
    #[must_use]
    pub fn background() -> Self {
        Self {
            namespace: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, ns: Namespace) -> Self {
        self.namespace = Some(Arc::new(ns));
        self
    }

    /// A copy of this context with the namespace removed but the same
    /// cancellation token. The store hands this to the engine so profile
    /// requests cannot re-resolve a parent namespace from stale identity.
    #[must_use]
    pub fn without_namespace(&self) -> Self {
        Self {
            namespace: None,
            cancel: self.cancel.clone(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_deref()
    }

    /// The namespace, defaulting to root when none is attached.
    #[must_use]
    pub fn namespace_or_root(&self) -> Namespace {
        self.namespace
            .as_deref()
            .cloned()
            .unwrap_or_else(Namespace::root)
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with a cancellation error when the token has fired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::cancelled`] if the context is cancelled.
    pub fn ensure_active(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
