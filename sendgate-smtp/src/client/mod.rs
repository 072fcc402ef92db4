//! SMTP client used to hand mail to a relay.
//!
//! - [`SmtpClient`]: plain, STARTTLS and implicit TLS sessions, `AUTH
//!   PLAIN`/`AUTH LOGIN`, and the MAIL/RCPT/DATA transaction
//! - [`MessageBuilder`]: renders the RFC 5322 message, with MIME attachments
//!
//! # Example
//!
//! ```no_run
//! use sendgate_smtp::{Credentials, Mechanism, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("relay.example.com:587", "relay.example.com".into()).await?;
//! client.read_greeting().await?;
//! client.ehlo("sendgate.example.com").await?;
//! client.starttls().await?;
//! client.ehlo("sendgate.example.com").await?;
//! client.auth(Mechanism::Plain, &Credentials::new("user", "secret")).await?;
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .html("<p>Hello</p>")
//!     .build()?;
//!
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod message;
mod response;
mod smtp_client;

pub use auth::{Credentials, Mechanism};
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder, guess_content_type};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
