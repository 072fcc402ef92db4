//! Intake error types

use sendgate_spool::SpoolError;
use thiserror::Error;

/// Why a mail request was not enqueued
#[derive(Debug, Error)]
pub enum IntakeError {
    /// A required form field was absent
    #[error("Key:{0} is missing.")]
    MissingField(&'static str),

    /// The attachment store or the queue could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] SpoolError),
}

impl IntakeError {
    /// Whether submitting the same request again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<SpoolError> for IntakeError {
    fn from(error: SpoolError) -> Self {
        Self::StorageUnavailable(error)
    }
}

/// Errors that can occur while running the intake server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind intake server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// Intake server encountered a runtime error
    #[error("Intake server error: {0}")]
    ServerError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message() {
        assert_eq!(
            IntakeError::MissingField("Subject").to_string(),
            "Key:Subject is missing."
        );
        assert!(!IntakeError::MissingField("From").is_retryable());
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let error = IntakeError::from(SpoolError::Unavailable("down".to_string()));
        assert!(error.is_retryable());
    }
}
