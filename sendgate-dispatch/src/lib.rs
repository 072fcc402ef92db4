//! Rate limited dispatch of queued mail through a pool of relays
//!
//! This crate provides:
//! - [`RelaySelector`]: per `(relay, recipient domain)` rate limiting over a
//!   shared [`CounterStore`](counter::CounterStore)
//! - [`DispatchPipeline`]: relay selection, attachment fetch, composition,
//!   send and attachment cleanup for one message
//! - [`DispatchWorker`]: the bounded-concurrency queue consumer
//! - [`SmtpTransport`]: the wire-level send

mod config;
pub mod counter;
mod error;
mod pipeline;
mod selector;
pub mod transport;
mod worker;

pub use config::{CleanupPolicy, CounterStoreConfig, DispatchConfig, RateLimitConfig, SmtpTimeouts};
pub use error::{DispatchError, SelectError, TransportError};
pub use pipeline::{DispatchPipeline, Dispatched};
pub use selector::RelaySelector;
pub use transport::{MailTransport, OutboundMail, SmtpTransport};
pub use worker::{DispatchWorker, Settled};
