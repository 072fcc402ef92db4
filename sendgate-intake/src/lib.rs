//! Mail intake for sendgate
//!
//! [`IntakePipeline`] validates a [`MailRequest`](sendgate_common::MailRequest),
//! uploads its attachments and publishes the queued record. [`IntakeServer`]
//! exposes it over HTTP.
//!
//! # Endpoints
//!
//! - **`POST /mail`** - `multipart/form-data` with `From`, `To`, `Subject`,
//!   `Body` and file parts. Replies `200 Enqueue mail success.`,
//!   `400 Key:<Field> is missing.` or `503` when storage is down.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sendgate_intake::{IntakeConfig, IntakePipeline, IntakeServer};
//! use sendgate_spool::{MemoryAttachmentStore, MemoryQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Arc::new(IntakePipeline::new(
//!     Arc::new(MemoryAttachmentStore::new()),
//!     Arc::new(MemoryQueue::default()),
//! ));
//! let server = IntakeServer::new(IntakeConfig::default(), pipeline).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod pipeline;
mod server;

pub use config::IntakeConfig;
pub use error::{IntakeError, ServerError};
pub use pipeline::IntakePipeline;
pub use server::{IntakeServer, router};
