//! Host request/response model and the injected request handler seam.
//!
//! The engine never talks to a network: it builds [`Request`] values and
//! hands them to a [`RequestHandler`] supplied at construction, which routes
//! them through the host's normal authorization stack.

use crate::context::Context;
use crate::error::Error;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation verb carried on a request. Free-form verbs are preserved so
/// hosts with richer operation sets can round-trip them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Read,
    Write,
    Delete,
    List,
    Scan,
    Other(String),
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Scan => "scan",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Operation {
    fn from(s: String) -> Self {
        match s.as_str() {
            "read" => Self::Read,
            // "update" is the wire spelling used by hosts that distinguish
            // create from update; both map onto write here.
            "write" | "update" => Self::Write,
            "delete" => Self::Delete,
            "list" => Self::List,
            "scan" => Self::Scan,
            _ => Self::Other(s),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API request as dispatched to the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    /// Stable identifier derived from the request's position in the
    /// profile, e.g. `context[0].setup.request[1].enable`.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub path: String,
    /// Never logged; see the engine's dispatch tracing.
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Request {
    #[must_use]
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            ..Self::default()
        }
    }
}

/// A handler response. A response that carries `error` reports a logical
/// failure even though the handler call itself succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub headers: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    #[must_use]
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error_response(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the logical error, if any, as a dispatch failure.
    #[must_use]
    pub fn to_error(&self) -> Option<Error> {
        self.error.as_ref().map(|msg| Error::dispatch(msg.clone()))
    }
}

/// Routes engine-built requests through the host. Implementations are
/// expected to enforce the host's authorization on every call; the engine
/// itself performs none.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, req: Request) -> Result<Response, Error>;
}
