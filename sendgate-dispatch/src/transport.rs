//! Sending a composed message through a relay
//!
//! [`SmtpTransport`] runs one SMTP conversation per message:
//! - greeting, EHLO
//! - TLS, as the relay's [`TlsPolicy`] asks
//! - AUTH with the relay's credentials, preferring PLAIN over LOGIN
//! - MAIL FROM, one RCPT TO per recipient, DATA
//! - QUIT, whose failure never fails a delivered message
//!
//! Every step is bounded by its own timeout from [`SmtpTimeouts`].

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sendgate_common::{RelayServer, TlsPolicy, outgoing, tracing};
use sendgate_smtp::{Credentials, Mechanism, Response, SmtpClient};

use crate::{SmtpTimeouts, TransportError};

/// A rendered message plus its SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub from: String,
    pub recipients: Vec<String>,
    /// The complete RFC 5322 message
    pub content: String,
}

/// Hands a message to a relay.
#[async_trait]
pub trait MailTransport: Send + Sync + std::fmt::Debug {
    /// Deliver `mail` through `relay`.
    ///
    /// # Errors
    /// If the relay cannot be reached or does not accept the message
    async fn send(&self, relay: &RelayServer, mail: &OutboundMail) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct SmtpTransport {
    helo_domain: String,
    timeouts: SmtpTimeouts,
}

/// Run `operation` with a limit of `secs` seconds.
async fn bounded<T>(
    stage: &'static str,
    secs: u64,
    operation: impl Future<Output = sendgate_smtp::client::Result<T>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(Duration::from_secs(secs), operation)
        .await
        .map_err(|_| TransportError::Timeout { stage, secs })?
        .map_err(TransportError::from)
}

/// Fail unless `response` is a 2xx reply.
fn expect_success(stage: &'static str, response: Response) -> Result<Response, TransportError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(rejected(stage, &response))
    }
}

fn rejected(stage: &'static str, response: &Response) -> TransportError {
    TransportError::Rejected {
        stage,
        code: response.code,
        message: response.message(),
    }
}

impl SmtpTransport {
    #[must_use]
    pub fn new(helo_domain: impl Into<String>, timeouts: SmtpTimeouts) -> Self {
        Self {
            helo_domain: helo_domain.into(),
            timeouts,
        }
    }

    /// Connect, read the greeting, and EHLO.
    async fn connect_and_greet(
        &self,
        relay: &RelayServer,
    ) -> Result<(SmtpClient, Response), TransportError> {
        let address = relay.address();
        let secs = self.timeouts.connect_secs;

        let connecting = async {
            let client = if relay.tls == TlsPolicy::Implicit {
                SmtpClient::connect_tls(&address, relay.host.clone(), relay.accept_invalid_certs)
                    .await
            } else {
                SmtpClient::connect(&address, relay.host.clone())
                    .await
                    .map(|client| client.accept_invalid_certs(relay.accept_invalid_certs))
            };

            client.map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })
        };

        let mut client = tokio::time::timeout(Duration::from_secs(secs), connecting)
            .await
            .map_err(|_| TransportError::Timeout {
                stage: "connect",
                secs,
            })??;

        let greeting = bounded("greeting", secs, client.read_greeting()).await?;
        expect_success("greeting", greeting)?;

        let ehlo = self.ehlo(&mut client).await?;
        Ok((client, ehlo))
    }

    async fn ehlo(&self, client: &mut SmtpClient) -> Result<Response, TransportError> {
        let response = bounded("EHLO", self.timeouts.ehlo_secs, client.ehlo(&self.helo_domain)).await?;
        expect_success("EHLO", response)
    }

    /// Upgrade with STARTTLS where the relay's policy asks for it.
    ///
    /// Returns the EHLO response that is valid for the rest of the session.
    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
        relay: &RelayServer,
        ehlo: Response,
    ) -> Result<Response, TransportError> {
        let advertised = ehlo.has_extension("STARTTLS");

        match relay.tls {
            TlsPolicy::Implicit | TlsPolicy::Disabled => return Ok(ehlo),
            TlsPolicy::Opportunistic if !advertised => return Ok(ehlo),
            TlsPolicy::Required if !advertised => {
                return Err(TransportError::TlsRequired(format!(
                    "{relay} does not advertise STARTTLS"
                )));
            }
            TlsPolicy::Opportunistic | TlsPolicy::Required => {}
        }

        let response = bounded("STARTTLS", self.timeouts.starttls_secs, client.starttls()).await?;
        if !response.is_success() {
            return Err(TransportError::TlsRequired(format!(
                "{relay} rejected STARTTLS: {} {}",
                response.code,
                response.message()
            )));
        }

        tracing::debug!(%relay, "TLS negotiated via STARTTLS");

        // Capabilities must be re-read over the encrypted channel
        self.ehlo(client).await
    }

    async fn authenticate(
        &self,
        client: &mut SmtpClient,
        relay: &RelayServer,
        ehlo: &Response,
    ) -> Result<(), TransportError> {
        if !relay.has_credentials() {
            return Ok(());
        }

        let offered = ehlo.auth_mechanisms();
        let mechanism = Mechanism::PREFERENCE
            .into_iter()
            .find(|mechanism| offered.contains(mechanism))
            .ok_or(TransportError::AuthUnsupported)?;

        if !client.is_tls() {
            tracing::warn!(%relay, "Sending relay credentials over an unencrypted connection");
        }

        let credentials = Credentials::new(relay.username.as_str(), relay.password.as_str());
        let response = bounded(
            "AUTH",
            self.timeouts.auth_secs,
            client.auth(mechanism, &credentials),
        )
        .await?;
        expect_success("AUTH", response)?;

        tracing::debug!(%relay, %mechanism, "Authenticated");
        Ok(())
    }

    async fn transmit(
        &self,
        client: &mut SmtpClient,
        mail: &OutboundMail,
    ) -> Result<(), TransportError> {
        let response = bounded(
            "MAIL FROM",
            self.timeouts.mail_from_secs,
            client.mail_from(&mail.from),
        )
        .await?;
        expect_success("MAIL FROM", response)?;

        for recipient in &mail.recipients {
            let response = bounded(
                "RCPT TO",
                self.timeouts.rcpt_to_secs,
                client.rcpt_to(recipient),
            )
            .await?;
            expect_success("RCPT TO", response)?;
        }

        let response = bounded("DATA", self.timeouts.data_secs, client.data()).await?;
        if response.code != 354 {
            return Err(rejected("DATA", &response));
        }

        let response = bounded(
            "DATA",
            self.timeouts.data_secs,
            client.send_data(&mail.content),
        )
        .await?;
        expect_success("message content", response)?;

        Ok(())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    #[tracing::instrument(level = "info", skip_all, fields(relay = %relay))]
    async fn send(&self, relay: &RelayServer, mail: &OutboundMail) -> Result<(), TransportError> {
        if relay.accept_invalid_certs {
            tracing::warn!(
                %relay,
                "SECURITY WARNING: TLS certificate validation is disabled for this relay"
            );
        }

        let (mut client, ehlo) = self.connect_and_greet(relay).await?;
        let ehlo = self.negotiate_tls(&mut client, relay, ehlo).await?;
        self.authenticate(&mut client, relay, &ehlo).await?;
        self.transmit(&mut client, mail).await?;

        outgoing!(level = INFO, "Relay {relay} accepted message for {} recipient(s)", mail.recipients.len());

        // The relay already took the message
        if let Err(error) = bounded("QUIT", self.timeouts.quit_secs, client.quit()).await {
            tracing::warn!(%relay, %error, "QUIT failed after successful delivery");
        }

        Ok(())
    }
}
