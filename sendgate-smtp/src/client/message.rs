//! Email message builder with support for headers, body, and MIME attachments.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Base64 output is wrapped at this many characters per line.
const LINE_LENGTH: usize = 76;

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum BodyKind {
    #[default]
    Plain,
    Html,
}

impl BodyKind {
    const fn content_type(self) -> &'static str {
        match self {
            Self::Plain => "text/plain; charset=utf-8",
            Self::Html => "text/html; charset=utf-8",
        }
    }
}

/// Builder for constructing email messages with proper MIME formatting.
///
/// Header values are stripped of line breaks, and non-ASCII subjects and
/// filenames are RFC 2047 encoded. Bodies and attachments are always sent
/// base64 encoded, so the rendered message is 7-bit clean.
///
/// # Examples
///
/// ```
/// use sendgate_smtp::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .html("<p>This is the message body</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("Content-Type: text/html; charset=utf-8"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    kind: BodyKind,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates a new empty message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a `text/plain` body.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self.kind = BodyKind::Plain;
        self
    }

    /// Sets a `text/html` body.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self.kind = BodyKind::Html;
        self
    }

    /// Adds an attachment with an explicit content type.
    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Adds an attachment whose content type is guessed from the filename.
    #[must_use]
    pub fn attach_named(self, filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = guess_content_type(&filename);
        self.attach(filename, content_type, data)
    }

    /// Renders the message.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no sender or no recipient.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::BuilderError("Missing From".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError("Missing To".to_string()));
        }

        let mut message = String::with_capacity(2048);
        self.write_headers(&mut message, from)?;

        if self.attachments.is_empty() {
            self.write_body_part(&mut message)?;
        } else {
            let boundary = format!("----=_Part_{}", ulid::Ulid::new());
            write!(
                message,
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            )?;

            write!(message, "--{boundary}\r\n")?;
            self.write_body_part(&mut message)?;

            for attachment in &self.attachments {
                write!(message, "--{boundary}\r\n")?;
                write!(message, "Content-Type: {}\r\n", sanitize(&attachment.content_type))?;
                write!(message, "Content-Transfer-Encoding: base64\r\n")?;
                write!(
                    message,
                    "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                    encode_word(&attachment.filename.replace('"', "'"))
                )?;
                message.push_str(&base64_lines(&attachment.data));
            }

            write!(message, "--{boundary}--\r\n")?;
        }

        Ok(message)
    }

    fn write_headers(&self, message: &mut String, from: &str) -> Result<()> {
        let date = chrono::Utc::now().to_rfc2822();
        write!(message, "Date: {date}\r\n")?;
        write!(message, "Message-ID: <{}@{}>\r\n", ulid::Ulid::new(), message_id_domain(from))?;
        write!(message, "From: {}\r\n", sanitize(from))?;

        let to = self.to.iter().map(|t| sanitize(t)).collect::<Vec<_>>().join(", ");
        write!(message, "To: {to}\r\n")?;

        if let Some(subject) = &self.subject {
            write!(message, "Subject: {}\r\n", encode_word(&sanitize(subject)))?;
        }

        for (name, value) in &self.headers {
            write!(message, "{}: {}\r\n", sanitize(name), sanitize(value))?;
        }

        write!(message, "MIME-Version: 1.0\r\n")?;
        Ok(())
    }

    fn write_body_part(&self, message: &mut String) -> Result<()> {
        write!(message, "Content-Type: {}\r\n", self.kind.content_type())?;
        write!(message, "Content-Transfer-Encoding: base64\r\n\r\n")?;
        message.push_str(&base64_lines(self.body.as_deref().unwrap_or_default().as_bytes()));
        Ok(())
    }
}

/// Remove line breaks so a value cannot start a new header.
fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 `B` encoding for header values that are not plain ASCII.
fn encode_word(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

/// The domain part of the sender, for `Message-ID`.
fn message_id_domain(from: &str) -> &str {
    from.rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost")
}

/// Base64 encode `data`, wrapped to [`LINE_LENGTH`] with CRLF line endings.
fn base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2 + 2);

    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        // Base64 output is ASCII, so every chunk is valid UTF-8
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}

/// Guesses the MIME content type from a filename's extension.
#[must_use]
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
