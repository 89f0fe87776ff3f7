//! Error taxonomy shared by every dashboard service.

use thiserror::Error;

use crate::document::DocumentError;

/// Result type alias for dashboard operations.
pub type DashResult<T> = Result<T, DashError>;

/// Errors surfaced to callers. Each variant maps to a stable
/// machine-readable code via [`DashError::code`].
#[derive(Debug, Error)]
pub enum DashError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{message}")]
    Unsupported { code: &'static str, message: String },

    /// The workload kind does not support the operation (`"scaled"`).
    #[error("{kind} cannot be {operation}")]
    OperationNotSupported { kind: String, operation: &'static str },

    #[error("{message}")]
    PreconditionFailed { code: &'static str, message: String },

    #[error("watch stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DashError {
    /// Named resource is absent.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            code: "NOT_FOUND",
            message: format!("{} not found", what.into()),
        }
    }

    pub fn unsupported_kind(kind: &str) -> Self {
        Self::Unsupported {
            code: "UNSUPPORTED_WORKLOAD_KIND",
            message: format!("unsupported workload type: {kind}"),
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound { code, .. }
            | Self::Unsupported { code, .. }
            | Self::PreconditionFailed { code, .. } => *code,
            Self::OperationNotSupported { .. } => "OPERATION_NOT_SUPPORTED",
            Self::StreamUnavailable(_) => "WATCH_STREAM_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DocumentError> for DashError {
    fn from(e: DocumentError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DashError::not_found("rollout").code(), "NOT_FOUND");
        assert_eq!(DashError::unsupported_kind("job").code(), "UNSUPPORTED_WORKLOAD_KIND");
        assert_eq!(DashError::StreamUnavailable("x".into()).code(), "WATCH_STREAM_UNAVAILABLE");
        assert_eq!(DashError::Internal("x".into()).code(), "INTERNAL_ERROR");
        let precondition = DashError::PreconditionFailed {
            code: "STABLE_REVISION_NOT_FOUND",
            message: "no stable revision".into(),
        };
        assert_eq!(precondition.code(), "STABLE_REVISION_NOT_FOUND");
        let refused = DashError::OperationNotSupported {
            kind: "DaemonSet".into(),
            operation: "scaled",
        };
        assert_eq!(refused.code(), "OPERATION_NOT_SUPPORTED");
        assert_eq!(refused.to_string(), "DaemonSet cannot be scaled");
    }

    #[test]
    fn not_found_message_names_the_resource() {
        assert_eq!(DashError::not_found("rollout").to_string(), "rollout not found");
    }
}
