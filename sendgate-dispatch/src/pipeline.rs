//! The per-message dispatch pipeline
//!
//! ```text
//! Received -> RelaySelected -> AttachmentsFetched -> Sent -> CleanedUp -> Done
//!     |             |                  |               |
//!     +-------------+------------------+---------------+--> Failed
//! ```
//!
//! A message leaves the pipeline either fully sent (and, per the
//! [`CleanupPolicy`], with its attachment blobs deleted) or with a
//! [`DispatchError`]. Attachment cleanup is a deferred action tied to the
//! send: it runs when the send returns, fails, or is cancelled, including
//! when the whole pipeline future is dropped mid-send.

use std::{fmt, future::Future, sync::Arc};

use futures_util::{StreamExt, TryStreamExt, stream};
use sendgate_common::{
    Domain, QueuedMail, RelayIndex, internal, mail::attachment_filename, tracing,
};
use sendgate_smtp::MessageBuilder;
use sendgate_spool::AttachmentStore;

use crate::{
    CleanupPolicy, DispatchConfig, DispatchError, RelaySelector,
    transport::{MailTransport, OutboundMail},
};

/// What a successful dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub relay: RelayIndex,
    pub attachments: usize,
}

pub struct DispatchPipeline {
    selector: Arc<RelaySelector>,
    attachments: Arc<dyn AttachmentStore>,
    transport: Arc<dyn MailTransport>,
    config: DispatchConfig,
}

impl fmt::Debug for DispatchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPipeline")
            .field("selector", &self.selector)
            .field("attachments", &self.attachments)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl DispatchPipeline {
    #[must_use]
    pub fn new(
        selector: Arc<RelaySelector>,
        attachments: Arc<dyn AttachmentStore>,
        transport: Arc<dyn MailTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            selector,
            attachments,
            transport,
            config,
        }
    }

    /// Dispatch one queued message.
    ///
    /// # Errors
    /// See [`DispatchError`]; a failed message is never partially sent.
    pub async fn process_one(&self, mail: &QueuedMail) -> Result<Dispatched, DispatchError> {
        self.process_until(mail, std::future::pending()).await
    }

    /// Dispatch one queued message, abandoning the send if `cancel`
    /// completes first.
    ///
    /// # Errors
    /// As [`process_one`](Self::process_one), plus
    /// [`DispatchError::SendCancelled`]
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(to = %mail.to, attachments = mail.attached_blob_names.len())
    )]
    pub async fn process_until(
        &self,
        mail: &QueuedMail,
        cancel: impl Future<Output = ()> + Send,
    ) -> Result<Dispatched, DispatchError> {
        let domain = Domain::of_recipient(&mail.to)
            .ok_or_else(|| DispatchError::InvalidRecipient(mail.to.clone()))?;
        let recipients = recipients(&mail.to);
        if recipients.is_empty() {
            return Err(DispatchError::InvalidRecipient(mail.to.clone()));
        }

        let (index, relay) = self.selector.select(&domain).await?;
        tracing::debug!(%domain, relay = index, "Relay selected");

        let attachments = self.fetch_attachments(&mail.attached_blob_names).await?;
        let count = attachments.len();
        let outbound = compose(mail, recipients, attachments)?;

        let cleanup = Cleanup {
            store: Arc::clone(&self.attachments),
            blobs: mail.attached_blob_names.clone(),
            parallelism: self.config.cleanup_parallelism,
            policy: self.config.cleanup,
            settled: false,
        };

        let sent = tokio::select! {
            biased;
            () = cancel => Err(DispatchError::SendCancelled { relay: index }),
            result = self.transport.send(relay, &outbound) => {
                result.map_err(|source| DispatchError::SendFailed { relay: index, source })
            }
        };

        cleanup.settle(sent.is_ok()).await;
        sent?;

        internal!(level = INFO, "Dispatched mail for {domain} through relay {index}");
        Ok(Dispatched {
            relay: index,
            attachments: count,
        })
    }

    /// Read every blob with at most `fetch_parallelism` reads in flight.
    ///
    /// Results keep the order of `blobs`; the first failure abandons the rest.
    async fn fetch_attachments(
        &self,
        blobs: &[String],
    ) -> Result<Vec<(String, Vec<u8>)>, DispatchError> {
        if blobs.is_empty() {
            return Ok(Vec::new());
        }

        let fetches: Vec<_> = blobs
            .iter()
            .map(|blob| {
                let store = Arc::clone(&self.attachments);
                let blob = blob.clone();
                async move {
                    match store.read_all(&blob).await {
                        Ok(data) => Ok((attachment_filename(&blob).to_string(), data)),
                        Err(source) => {
                            tracing::warn!(blob = %blob, error = %source, "Failed to fetch attachment");
                            Err(DispatchError::AttachmentFetchFailed { blob, source })
                        }
                    }
                }
            })
            .collect();

        stream::iter(fetches)
            .buffered(self.config.fetch_parallelism.max(1))
            .try_collect()
            .await
    }
}

/// The individual recipients of a comma separated `to` field.
fn recipients(to: &str) -> Vec<String> {
    to.split(',')
        .map(envelope_address)
        .filter(|address| !address.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// The bare address of `Name <address>`, or the trimmed value itself.
fn envelope_address(value: &str) -> &str {
    let value = value.trim();
    match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].trim(),
        _ => value,
    }
}

fn compose(
    mail: &QueuedMail,
    recipients: Vec<String>,
    attachments: Vec<(String, Vec<u8>)>,
) -> Result<OutboundMail, DispatchError> {
    let mut builder = MessageBuilder::new()
        .from(mail.from.as_str())
        .subject(mail.subject.as_str())
        .html(mail.body.as_str());

    for recipient in &recipients {
        builder = builder.to(recipient.as_str());
    }

    for (filename, data) in attachments {
        builder = builder.attach_named(filename, data);
    }

    let content = builder.build().map_err(DispatchError::Compose)?;

    Ok(OutboundMail {
        from: envelope_address(&mail.from).to_string(),
        recipients,
        content,
    })
}

/// Deferred deletion of a message's blobs.
///
/// [`settle`](Self::settle) runs it in place once the send outcome is known.
/// If the pipeline is dropped before that, `Drop` hands the deletion to the
/// runtime instead, treating the send as not completed.
struct Cleanup {
    store: Arc<dyn AttachmentStore>,
    blobs: Vec<String>,
    parallelism: usize,
    policy: CleanupPolicy,
    settled: bool,
}

impl Cleanup {
    async fn settle(mut self, sent: bool) {
        self.settled = true;

        if self.policy.should_clean(sent) {
            delete_all(&self.store, &self.blobs, self.parallelism).await;
        } else if !self.blobs.is_empty() {
            tracing::debug!(blobs = self.blobs.len(), "Keeping attachments for redelivery");
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if self.settled || self.blobs.is_empty() || !self.policy.should_clean(false) {
            return;
        }

        let store = Arc::clone(&self.store);
        let blobs = std::mem::take(&mut self.blobs);
        let parallelism = self.parallelism;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    delete_all(&store, &blobs, parallelism).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    blobs = blobs.len(),
                    "Send abandoned outside a runtime, attachments left in place"
                );
            }
        }
    }
}

/// Delete `blobs` with at most `parallelism` deletes in flight. Failures are
/// logged and otherwise ignored.
async fn delete_all(store: &Arc<dyn AttachmentStore>, blobs: &[String], parallelism: usize) {
    let deletes: Vec<_> = blobs
        .iter()
        .map(|blob| {
            let store = Arc::clone(store);
            let blob = blob.clone();
            async move {
                match store.delete(&blob).await {
                    Ok(()) => tracing::debug!(blob = %blob, "Attachment deleted"),
                    Err(error) => tracing::warn!(blob = %blob, %error, "Failed to delete attachment"),
                }
            }
        })
        .collect();

    stream::iter(deletes)
        .buffer_unordered(parallelism.max(1))
        .collect::<Vec<()>>()
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_recipients_split_and_trim() {
        assert_eq!(
            recipients(" a@x.com, Bee <b@gmail.com> ,,"),
            vec!["a@x.com".to_string(), "b@gmail.com".to_string()]
        );
        assert!(recipients(" , ").is_empty());
    }

    #[test]
    fn test_envelope_address() {
        assert_eq!(envelope_address("Sender <s@example.com>"), "s@example.com");
        assert_eq!(envelope_address(" s@example.com "), "s@example.com");
        assert_eq!(envelope_address("broken> <"), "broken> <");
    }

    #[test]
    fn test_compose_names_attachments_by_last_segment() {
        let mail = QueuedMail {
            from: "Sender <s@example.com>".to_string(),
            to: "r@gmail.com".to_string(),
            subject: "Report".to_string(),
            body: "<p>See attached</p>".to_string(),
            attached_blob_names: Vec::new(),
        };

        let outbound = compose(
            &mail,
            vec!["r@gmail.com".to_string()],
            vec![("report.pdf".to_string(), b"%PDF".to_vec())],
        )
        .unwrap();

        assert_eq!(outbound.from, "s@example.com");
        assert_eq!(outbound.recipients, vec!["r@gmail.com".to_string()]);
        assert!(outbound.content.contains("Content-Type: text/html; charset=utf-8"));
        assert!(outbound.content.contains("filename=\"report.pdf\""));
        assert!(outbound.content.contains("Subject: Report\r\n"));
    }
}
