//! Durable collaborators of the dispatcher.
//!
//! - [`attachments`]: blob storage for uploaded attachments
//! - [`queue`]: at-least-once delivery of [`QueuedMail`] records
//!
//! [`QueuedMail`]: sendgate_common::QueuedMail

pub mod attachments;
pub mod config;
pub mod error;
pub mod queue;
mod path;
pub mod types;

pub use attachments::{
    AttachmentStore, BlobReader, FileAttachmentStore, MemoryAttachmentStore, generate_blob_name,
};
pub use config::{AttachmentStoreConfig, QueueBackend, QueueConfig};
pub use error::{Result, SpoolError};
pub use queue::{Delivery, FileQueue, MailQueue, MemoryQueue, RedeliveryPolicy};
pub use types::MessageId;
