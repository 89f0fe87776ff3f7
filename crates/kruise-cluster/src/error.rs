//! Error types for cluster access.

use kruise_core::{DashError, DocumentError};
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by a [`crate::ClusterApi`] implementation.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Log the failure with its request context and convert it for the caller.
    pub fn report(self, operation: &str, namespace: &str, name: &str) -> DashError {
        if self.is_not_found() {
            warn!(operation, namespace, name, error = %self, "cluster object not found");
        } else {
            error!(operation, namespace, name, error = %self, "cluster API call failed");
        }
        self.into()
    }
}

impl From<DocumentError> for ClusterError {
    fn from(e: DocumentError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<ClusterError> for DashError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::NotFound { .. } => DashError::NotFound {
                code: "NOT_FOUND",
                message: e.to_string(),
            },
            other => DashError::Internal(other.to_string()),
        }
    }
}
