use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    AttachmentStore, FileAttachmentStore, FileQueue, MailQueue, MemoryAttachmentStore, MemoryQueue,
    Result, queue::RedeliveryPolicy,
};

/// Configuration for the attachment store
///
/// # Examples
///
/// Directory-backed store:
/// ```ron
/// attachments: File(
///     path: "/var/spool/sendgate/attachments",
/// ),
/// ```
///
/// In-memory store for testing:
/// ```ron
/// attachments: Memory,
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum AttachmentStoreConfig {
    File { path: PathBuf },
    Memory,
}

impl Default for AttachmentStoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/spool/sendgate/attachments"),
        }
    }
}

impl AttachmentStoreConfig {
    /// Build and initialise the configured store.
    ///
    /// # Errors
    /// If a file-backed store path is invalid or cannot be initialised
    pub fn into_store(self) -> Result<Arc<dyn AttachmentStore>> {
        match self {
            Self::File { path } => {
                let store = FileAttachmentStore::new(path)?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory => Ok(Arc::new(MemoryAttachmentStore::new())),
        }
    }
}

/// Where queued records live.
#[derive(Debug, Clone, Deserialize)]
pub enum QueueBackend {
    File { path: PathBuf },
    Memory,
}

impl Default for QueueBackend {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/spool/sendgate/queue"),
        }
    }
}

/// Configuration for the mail queue
///
/// ```ron
/// queue: (
///     backend: File(path: "/var/spool/sendgate/queue"),
///     max_deliveries: 5,
///     redelivery_delay_secs: 30,
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Deliveries before a nacked record is dead-lettered
    pub max_deliveries: u32,
    pub redelivery_delay_secs: u64,
    /// How often an idle file queue rescans its directory
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            max_deliveries: 5,
            redelivery_delay_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_deliveries: self.max_deliveries,
            delay: Duration::from_secs(self.redelivery_delay_secs),
        }
    }

    /// Build and initialise the configured queue.
    ///
    /// # Errors
    /// If the file queue path is invalid or cannot be initialised
    pub fn into_queue(self) -> Result<Arc<dyn MailQueue>> {
        let policy = self.redelivery_policy();

        match self.backend {
            QueueBackend::File { path } => {
                let queue = FileQueue::new(path, policy, Duration::from_millis(self.poll_interval_ms))?;
                queue.init()?;
                Ok(Arc::new(queue))
            }
            QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new(policy))),
        }
    }
}
