//! Mail records exchanged between intake and dispatch.
//!
//! [`MailRequest`] is what the intake side receives; it only lives for the
//! duration of one intake call. [`QueuedMail`] is the queue payload. Its JSON
//! field names are the wire contract between intake and dispatch.

use serde::{Deserialize, Serialize};

/// Stores write partial files under this prefix, so no stored name may
/// start with it.
pub const TEMP_FILE_PREFIX: &str = ".tmp_";

/// An uploaded attachment, as received by intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename supplied by the client.
    pub filename: String,
    /// Raw attachment bytes.
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// The filename with any client-side directory components removed.
    ///
    /// Blob names are `<unique-id>/<filename>`, and dispatch recovers the
    /// filename from the trailing path segment, so the stored filename must not
    /// contain separators of its own. NULs and a leading [`TEMP_FILE_PREFIX`]
    /// are dropped. Falls back to `attachment` when nothing usable remains.
    #[must_use]
    pub fn storage_filename(&self) -> String {
        let cleaned = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .replace('\0', "");

        let mut name = cleaned.trim();
        while let Some(rest) = name.strip_prefix(TEMP_FILE_PREFIX) {
            name = rest.trim_start();
        }

        if name.is_empty() || name == "." || name == ".." {
            "attachment".to_string()
        } else {
            name.to_string()
        }
    }
}

/// An outbound mail request as received by intake.
///
/// Every text field is optional here because presence is exactly what intake
/// validates. An empty string still counts as present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailRequest {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// The durable queue record.
///
/// Each name in `attached_blob_names` refers to an object in the attachment
/// store that existed when the record was published. Ownership of those
/// objects passes to the dispatch side together with the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueuedMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attached_blob_names: Vec<String>,
}

impl QueuedMail {
    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid `QueuedMail` record.
    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// The original filename of a blob: its trailing path segment.
///
/// ```
/// use sendgate_common::mail::attachment_filename;
///
/// assert_eq!(attachment_filename("0a1b/report.pdf"), "report.pdf");
/// assert_eq!(attachment_filename("plain.txt"), "plain.txt");
/// ```
#[must_use]
pub fn attachment_filename(blob_name: &str) -> &str {
    blob_name.rsplit('/').next().unwrap_or(blob_name)
}
