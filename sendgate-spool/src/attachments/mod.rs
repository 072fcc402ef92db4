//! Blob storage for uploaded attachments
//!
//! Blobs are addressed by opaque `/` separated names. Intake creates them as
//! `<unique-id>/<filename>` via [`generate_blob_name`]; dispatch reads them
//! back, and deletes them once the mail has gone out.

mod file;
mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use file::FileAttachmentStore;
pub use memory::MemoryAttachmentStore;

use crate::Result;

/// A readable stream over a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Durable storage for attachment blobs.
#[async_trait]
pub trait AttachmentStore: Send + Sync + std::fmt::Debug {
    /// Whether a blob with this name exists.
    ///
    /// # Errors
    /// If the store cannot be reached
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Store `data` under `name`, replacing any previous content.
    ///
    /// # Errors
    /// If the name is invalid or the store cannot be written
    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()>;

    /// Open the named blob for reading.
    ///
    /// # Errors
    /// [`SpoolError::BlobNotFound`](crate::SpoolError::BlobNotFound) if no
    /// such blob exists, or any storage failure
    async fn open_read(&self, name: &str) -> Result<BlobReader>;

    /// Remove the named blob.
    ///
    /// # Errors
    /// [`SpoolError::BlobNotFound`](crate::SpoolError::BlobNotFound) if no
    /// such blob exists, or any storage failure
    async fn delete(&self, name: &str) -> Result<()>;

    /// Read the whole blob into memory.
    ///
    /// # Errors
    /// As for [`open_read`](Self::open_read), plus any read failure
    async fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_read(name).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

/// A fresh blob name for an uploaded file: `<ulid>/<filename>`.
///
/// The ULID prefix keeps uploads with the same filename apart. Callers still
/// check [`AttachmentStore::exists`] before writing, and draw again on a
/// collision.
#[must_use]
pub fn generate_blob_name(filename: &str) -> String {
    format!("{}/{filename}", ulid::Ulid::new())
}
