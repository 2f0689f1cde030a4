//! cascade: a declarative request-profile engine.
//!
//! A *profile* is a small program embedded in a configuration document: an
//! optional typed input schema, one or more named blocks of ordered request
//! specifications, and an optional output projection. Request fields may be
//! dynamic, resolved at evaluation time by pluggable sources (caller input,
//! template interpolation, CEL expressions, references to earlier requests
//! and responses). The [`engine::ProfileEngine`] validates the program,
//! resolves every field bottom-up, dispatches requests through an injected
//! handler in declared order, and accumulates a history later expressions
//! may read.
//!
//! [`store::ProfileStore`] persists named profiles per namespace with
//! check-and-set versioning and defines the trust boundary around
//! execution; [`endpoints::ProfileBackend`] wires the management and
//! execution routes.
//!
//! The engine is deliberately not a workflow system: evaluation is
//! single-shot and strictly sequential, with no retries, conditionals,
//! loops, or parallel fan-out.

pub mod api;
pub mod config;
pub mod constants;
pub mod context;
pub mod document;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod logging;
pub mod schema;
pub mod source;
pub mod storage;
pub mod store;

pub use api::{Operation, Request, RequestHandler, Response};
pub use context::{Context, Namespace};
pub use engine::ProfileEngine;
pub use error::{Error, ErrorKind};
pub use store::{ProfileEntry, ProfileStore};
