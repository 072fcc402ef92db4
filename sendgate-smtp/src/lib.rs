//! Outbound SMTP for sendgate.
//!
//! [`client::SmtpClient`] speaks the wire protocol to a relay, and
//! [`client::MessageBuilder`] renders the RFC 5322 message it sends.

pub mod client;

pub use client::{ClientError, Credentials, Mechanism, MessageBuilder, Response, SmtpClient};
