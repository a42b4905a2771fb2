//! Error types for plan rewriting

use thiserror::Error;

/// Errors raised by the transformers and the orchestrator.
///
/// A retry that is merely not allowed is not an error; it comes back as a
/// `RetryInfo` with `is_resumable == false`.
#[derive(Debug, Error)]
pub enum ReplanError {
    /// The request references stages or groups it is not allowed to
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Something produced internally is broken (defect upstream)
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unsupported execution mode: {0}")]
    UnsupportedMode(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure at the persistence boundary
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ReplanError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ReplanError::InvalidRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ReplanError::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ReplanError>;
