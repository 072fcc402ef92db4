//! Error types for the sendgate-spool crate.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Errors raised by attachment stores and queues.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No blob exists under this name.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// The blob name is not acceptable to the store.
    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    /// The queue has no in-flight delivery with this id.
    #[error("Delivery not in flight: {0}")]
    NotInFlight(MessageId),

    /// A queue payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store root failed validation.
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    /// The backing service cannot be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl SpoolError {
    /// Returns `true` if the named blob or delivery simply does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::BlobNotFound(_) | Self::NotInFlight(_))
    }
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
