//! Centralized string constants for the cascade crate.

// Dynamic-field marker keys. A map carrying both keys is resolved through
// the named source and coerced to the named type; carrying exactly one of
// them is a configuration error.
pub const EVAL_SOURCE_KEY: &str = "eval_source";
pub const EVAL_TYPE_KEY: &str = "eval_type";

// Built-in source names.
pub const SOURCE_INPUT: &str = "input";
pub const SOURCE_TEMPLATE: &str = "template";
pub const SOURCE_CEL: &str = "cel";
pub const SOURCE_REQUEST: &str = "request";
pub const SOURCE_RESPONSE: &str = "response";

// Document block keys.
pub const BLOCK_INPUT: &str = "input";
pub const BLOCK_OUTPUT: &str = "output";
pub const BLOCK_REQUEST: &str = "request";
pub const BLOCK_FIELDS: &str = "fields";

// The outer block key used by stored profiles.
pub const STORE_OUTER_BLOCK: &str = "context";

// Storage layout.
pub const PROFILE_SUB_PATH: &str = "profiles/";
pub const NAMESPACE_SUB_PATH: &str = "namespaces/";

// Endpoint routes, relative to the backend mount.
pub const ROUTE_MANAGE: &str = "profiles/manage/";
pub const ROUTE_EXECUTE: &str = "profiles/execute/";
pub const ROUTE_UNAUTHED_EXECUTE: &str = "profiles/unauthed-execute/";
