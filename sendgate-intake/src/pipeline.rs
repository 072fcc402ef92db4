//! Turning a mail request into a queued record
//!
//! A request is validated, each attachment is uploaded under a fresh
//! `<ulid>/<filename>` blob name, and a [`QueuedMail`] naming those blobs is
//! published. From that point the blobs belong to the dispatch side.

use std::{fmt, sync::Arc};

use sendgate_common::{Attachment, MailRequest, QueuedMail, incoming, tracing};
use sendgate_spool::{AttachmentStore, MailQueue, MessageId, SpoolError, generate_blob_name};

use crate::IntakeError;

/// Draws before giving up on finding an unused blob name.
const MAX_NAME_ATTEMPTS: usize = 16;

type BlobNamer = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub struct IntakePipeline {
    attachments: Arc<dyn AttachmentStore>,
    queue: Arc<dyn MailQueue>,
    namer: BlobNamer,
}

impl fmt::Debug for IntakePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakePipeline")
            .field("attachments", &self.attachments)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// The value of a required field, or which field is missing.
fn required(value: Option<String>, field: &'static str) -> Result<String, IntakeError> {
    value.ok_or(IntakeError::MissingField(field))
}

impl IntakePipeline {
    #[must_use]
    pub fn new(attachments: Arc<dyn AttachmentStore>, queue: Arc<dyn MailQueue>) -> Self {
        Self {
            attachments,
            queue,
            namer: Arc::new(generate_blob_name),
        }
    }

    /// Replace the blob name generator.
    #[must_use]
    pub fn with_blob_namer(
        mut self,
        namer: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.namer = Arc::new(namer);
        self
    }

    /// Validate `request`, upload its attachments and enqueue it.
    ///
    /// Fields are checked in the order `From`, `To`, `Subject`, `Body`; the
    /// first one missing is reported and nothing is stored.
    ///
    /// # Errors
    /// [`IntakeError::MissingField`] for an incomplete request,
    /// [`IntakeError::StorageUnavailable`] if the store or queue fails. Blobs
    /// uploaded before a failure are deleted again on a best-effort basis.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(attachments = request.attachments.len())
    )]
    pub async fn submit(&self, request: MailRequest) -> Result<MessageId, IntakeError> {
        let MailRequest {
            from,
            to,
            subject,
            body,
            attachments,
        } = request;

        let from = required(from, "From")?;
        let to = required(to, "To")?;
        let subject = required(subject, "Subject")?;
        let body = required(body, "Body")?;

        let mut stored = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match self.store(attachment).await {
                Ok(name) => stored.push(name),
                Err(error) => {
                    self.discard(&stored).await;
                    return Err(error.into());
                }
            }
        }

        let mail = QueuedMail {
            from,
            to,
            subject,
            body,
            attached_blob_names: stored,
        };

        match self.queue.publish(&mail).await {
            Ok(id) => {
                incoming!(
                    level = INFO,
                    "Enqueued mail {id} with {} attachment(s)",
                    mail.attached_blob_names.len()
                );
                Ok(id)
            }
            Err(error) => {
                tracing::error!(%error, "Failed to publish mail");
                self.discard(&mail.attached_blob_names).await;
                Err(error.into())
            }
        }
    }

    /// Upload one attachment under a blob name nothing else uses.
    async fn store(&self, attachment: Attachment) -> Result<String, SpoolError> {
        let filename = attachment.storage_filename();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = (self.namer)(&filename);
            if self.attachments.exists(&name).await? {
                tracing::debug!(blob = %name, "Blob name taken, drawing another");
                continue;
            }

            self.attachments.put(&name, attachment.data).await?;
            tracing::debug!(blob = %name, "Attachment stored");
            return Ok(name);
        }

        Err(SpoolError::Unavailable(format!(
            "no free blob name for {filename} after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }

    async fn discard(&self, blobs: &[String]) {
        for blob in blobs {
            if let Err(error) = self.attachments.delete(blob).await {
                tracing::warn!(blob = %blob, %error, "Failed to remove orphaned attachment");
            }
        }
    }
}
