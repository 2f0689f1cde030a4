//! Tracing initialization for hosts and tests.
//!
//! The crate itself only emits `tracing` events (targets `cascade::engine`
//! and `cascade::store`); embedding hosts bring their own subscriber. This
//! helper exists for binaries and integration tests that want a quick
//! env-filtered setup.

use tracing_subscriber::EnvFilter;

/// Initializes a global subscriber filtered by `CASCADE_LOG` (default
/// `error`). Repeated calls are no-ops, so tests can call this freely.
pub fn init() {
    init_with_default("error");
}

/// Initializes a global subscriber with an explicit default filter, still
/// overridable through `CASCADE_LOG`.
pub fn init_with_default(default_filter: &str) {
    let filter = std::env::var("CASCADE_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_new(default_filter).ok())
        .unwrap_or_else(|| EnvFilter::new("error"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
