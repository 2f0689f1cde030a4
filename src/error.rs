//! Error handling for the cascade crate.
//!
//! All errors are consolidated into a single [`Error`] type classified by
//! [`ErrorKind`]. Profile documents are operator-supplied, so messages carry
//! enough positional context (`context.0.request.2: …`) to locate the
//! offending block without access to server internals.

use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// Fixed message returned for unauthenticated execution of a profile that
/// is missing or not marked for unauthenticated use. The two cases must be
/// indistinguishable so the endpoint cannot be used as an existence oracle.
pub const PERMISSION_DENIED_MSG: &str = "permission denied";

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HCL error: {0}")]
    Hcl(#[from] hcl::Error),

    #[error("{kind}: {message}")]
    Internal {
        kind: ErrorKind,
        message: Cow<'static, str>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Error categories used throughout the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Malformed document, duplicate or invalid name, unknown source or
    /// type tag, mismatched eval marker pair.
    Config,
    /// Input schema violation, missing required field, source validation
    /// failure, engine construction failure.
    Validation,
    /// The injected request handler returned an error or an error response.
    Dispatch,
    /// Template render failure, CEL runtime failure, history lookup miss.
    SourceEval,
    /// Unauthenticated access to a missing or non-unauthenticated profile.
    Permission,
    /// Check-and-set mismatch or missing CAS on a CAS-required entry.
    CasViolation,
    /// Entry not found on an authenticated path.
    NotFound,
    /// Underlying storage failure.
    Storage,
    /// The evaluation context was cancelled.
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "Config",
            Self::Validation => "Validation",
            Self::Dispatch => "Dispatch",
            Self::SourceEval => "SourceEval",
            Self::Permission => "Permission",
            Self::CasViolation => "CasViolation",
            Self::NotFound => "NotFound",
            Self::Storage => "Storage",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    fn internal(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::Config, message)
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::Validation, message)
    }

    pub fn dispatch(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::Dispatch, message)
    }

    pub fn source_eval(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::SourceEval, message)
    }

    /// The permission error is deliberately constant: it must not leak
    /// whether the target exists.
    #[must_use]
    pub fn permission_denied() -> Self {
        Self::internal(ErrorKind::Permission, PERMISSION_DENIED_MSG)
    }

    pub fn cas_violation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::CasViolation, message)
    }

    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Self::internal(ErrorKind::NotFound, format!("no entry at '{path}'"))
    }

    pub fn storage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::Storage, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::internal(ErrorKind::Cancelled, "evaluation context was cancelled")
    }

    /// Returns the kind for consolidated errors, `None` for passthrough
    /// variants (JSON, HCL, anyhow).
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Internal { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Internal {
                kind: ErrorKind::Cancelled,
                ..
            }
        )
    }

    /// Prefixes the message with positional context, preserving the kind.
    #[must_use]
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::Internal { kind, message } => Self::Internal {
                kind,
                message: Cow::Owned(format!("{context}: {message}")),
            },
            other => Self::internal(ErrorKind::Config, format!("{context}: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_error_is_constant() {
        let missing = Error::permission_denied();
        let forbidden = Error::permission_denied();
        assert_eq!(missing.to_string(), forbidden.to_string());
        assert!(!missing.to_string().contains("not found"));
    }

    #[test]
    fn with_context_prefixes_and_keeps_kind() {
        let err = Error::config("duplicate request name 'a'").with_context("context.0");
        assert_eq!(err.kind(), Some(ErrorKind::Config));
        assert!(err.to_string().contains("context.0: duplicate"));
    }

    #[test]
    fn cancellation_is_detectable() {
        assert!(Error::cancelled().is_cancellation());
        assert!(!Error::dispatch("boom").is_cancellation());
    }
}
