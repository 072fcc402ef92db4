//! Typed error handling for dispatch operations.
//!
//! [`DispatchError`] is what one attempt at a queued message ends in. Its
//! [`is_retryable`](DispatchError::is_retryable) classification separates
//! transient conditions (no free relay, storage or relay hiccups) from
//! records that will fail the same way on every redelivery.

use sendgate_common::{Domain, RelayIndex};
use sendgate_smtp::ClientError;
use sendgate_spool::SpoolError;
use thiserror::Error;

use crate::counter::CounterStoreError;

/// Relay selection failures.
#[derive(Debug, Error)]
pub enum SelectError {
    /// Every relay is held or disabled for this domain in the current window.
    #[error("No relay available for {0}")]
    NoAvailableRelay(Domain),

    /// The counter store returned, or an operator named, a relay that is not
    /// configured.
    #[error("Unknown relay index {0}")]
    UnknownRelay(RelayIndex),

    #[error(transparent)]
    Store(#[from] CounterStoreError),
}

/// Failures talking to a relay.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ClientError,
    },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// The relay answered a step with an error or unexpected reply.
    #[error("Relay rejected {stage}: {code} {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    /// The relay's TLS policy demands encryption the relay cannot provide.
    #[error("TLS required: {0}")]
    TlsRequired(String),

    /// Credentials are configured but the relay offers no mechanism we speak.
    #[error("Relay offers no supported AUTH mechanism")]
    AuthUnsupported,

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl TransportError {
    /// Returns `true` if retrying the same message against the same relay
    /// cannot succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => *code >= 500 && *code < 600,
            Self::TlsRequired(_) | Self::AuthUnsupported => true,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Client(_) => false,
        }
    }
}

/// The outcome of a failed dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queued record could not be decoded.
    #[error("Invalid queue payload: {0}")]
    InvalidPayload(#[source] SpoolError),

    /// The `to` field has no usable recipient or domain.
    #[error("Invalid recipient: {0:?}")]
    InvalidRecipient(String),

    /// Every relay is held for the domain; redelivery retries later.
    #[error("No relay available for {0}")]
    NoAvailableRelay(Domain),

    #[error("Relay selection failed: {0}")]
    Selection(#[source] SelectError),

    #[error("Failed to fetch attachment {blob}: {source}")]
    AttachmentFetchFailed {
        blob: String,
        #[source]
        source: SpoolError,
    },

    #[error("Failed to compose message: {0}")]
    Compose(#[source] ClientError),

    #[error("Send through relay {relay} failed: {source}")]
    SendFailed {
        relay: RelayIndex,
        #[source]
        source: TransportError,
    },

    #[error("Send through relay {relay} was cancelled")]
    SendCancelled { relay: RelayIndex },
}

impl DispatchError {
    /// Returns `true` if a later delivery of the same record may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NoAvailableRelay(_)
            | Self::Selection(_)
            | Self::AttachmentFetchFailed { .. }
            | Self::SendCancelled { .. } => true,
            Self::SendFailed { source, .. } => !source.is_permanent(),
            Self::InvalidPayload(_) | Self::InvalidRecipient(_) | Self::Compose(_) => false,
        }
    }
}

impl From<SelectError> for DispatchError {
    fn from(error: SelectError) -> Self {
        match error {
            SelectError::NoAvailableRelay(domain) => Self::NoAvailableRelay(domain),
            other => Self::Selection(other),
        }
    }
}
