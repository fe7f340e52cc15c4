//! Error types for the Rolekeeper operator

use thiserror::Error;

use crate::iam::IamApiError;

/// Main error type for Rolekeeper operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// IAM provider error, already mapped into the local error taxonomy
    #[error("iam error: {0}")]
    Iam(#[from] IamApiError),

    /// Validation error for IamRole specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or malformed operator configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An IAM role with the requested name exists but belongs to a
    /// different namespace; requires operator intervention, never retried
    /// to success
    #[error("ownership conflict: {0}")]
    OwnershipConflict(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an ownership conflict error with the given message
    pub fn ownership_conflict(msg: impl Into<String>) -> Self {
        Self::OwnershipConflict(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether the controller should keep retrying this error on its
    /// backoff schedule
    ///
    /// Ownership conflicts are surfaced in status and wait for a human;
    /// everything else re-enters the retry loop since local state may still
    /// need correction.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::OwnershipConflict(_))
    }
}
