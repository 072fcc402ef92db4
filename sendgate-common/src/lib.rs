//! Types shared by every sendgate crate.
//!
//! - [`mail`]: the intake request and the queued wire record
//! - [`relay`]: relay servers and the registry of filtered domains
//! - [`domain`]: normalised recipient domains
//! - [`logging`]: tracing setup and logging macros

pub mod domain;
pub mod error;
pub mod logging;
pub mod mail;
pub mod relay;

pub use domain::Domain;
pub use error::ConfigError;
pub use mail::{Attachment, MailRequest, QueuedMail};
pub use relay::{RelayIndex, RelayRegistry, RelayServer, TlsPolicy};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
