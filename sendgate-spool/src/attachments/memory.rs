use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AttachmentStore, BlobReader};
use crate::{Result, SpoolError, path::validate_blob_name};

/// In-memory attachment store
///
/// Intended for tests and development. Clones share the same blobs.
///
/// The store can be switched offline with [`set_available`](Self::set_available),
/// after which every operation fails with [`SpoolError::Unavailable`], and it
/// counts reads and deletes so callers can assert on storage traffic.
#[derive(Debug, Clone, Default)]
pub struct MemoryAttachmentStore {
    blobs: Arc<RwLock<AHashMap<String, Arc<[u8]>>>>,
    offline: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl MemoryAttachmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all stored blobs, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.blobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of `open_read` calls made so far
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `delete` calls made so far
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            Err(SpoolError::Unavailable(
                "memory attachment store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.blobs.read().contains_key(name))
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.check_available()?;
        validate_blob_name(name)?;
        self.blobs.write().insert(name.to_string(), Arc::from(data));
        Ok(())
    }

    async fn open_read(&self, name: &str) -> Result<BlobReader> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let data = self
            .blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SpoolError::BlobNotFound(name.to_string()))?;

        Ok(Box::pin(Cursor::new(data)))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        self.blobs
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SpoolError::BlobNotFound(name.to_string()))
    }
}
