//! Outbound relay servers and the registry of rate limited domains.
//!
//! The registry is built once from configuration and never mutated. Relays
//! are identified by their position in the configured list: the index, not a
//! name, is what the rate limiter keys on.

use std::fmt;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Domain};

/// Position of a relay in the [`RelayRegistry`].
pub type RelayIndex = usize;

/// TLS policy for a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsPolicy {
    /// Upgrade with STARTTLS when the relay advertises it.
    #[default]
    Opportunistic,

    /// Upgrade with STARTTLS and fail the send if the relay cannot.
    Required,

    /// Connect with TLS from the first byte (submission over port 465).
    Implicit,

    /// Never use TLS.
    ///
    /// **WARNING**: credentials are sent in the clear. Only use for local
    /// testing.
    Disabled,
}

/// A relay endpoint and the credentials used to authenticate against it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    #[serde(default)]
    pub tls: TlsPolicy,

    /// Accept invalid TLS certificates (self-signed test relays only).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl RelayServer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            tls: TlsPolicy::default(),
            accept_invalid_certs: false,
        }
    }

    #[must_use]
    pub const fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// `host:port`, suitable for connecting.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the relay expects credentials at all.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

impl fmt::Display for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize)]
struct RelayRegistryConfig {
    relays: Vec<RelayServer>,
    #[serde(default)]
    filtered_domains: Vec<Domain>,
}

/// The ordered list of relays and the set of filtered recipient domains.
///
/// Mail to a filtered domain goes through rate limited relay selection; all
/// other mail uses the first relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RelayRegistryConfig")]
pub struct RelayRegistry {
    relays: Vec<RelayServer>,
    filtered_domains: AHashSet<Domain>,
}

impl RelayRegistry {
    /// Build a registry.
    ///
    /// # Errors
    ///
    /// Fails if no relays are given or a relay has an empty host or zero
    /// port.
    pub fn new(
        relays: Vec<RelayServer>,
        filtered_domains: impl IntoIterator<Item = Domain>,
    ) -> Result<Self, ConfigError> {
        if relays.is_empty() {
            return Err(ConfigError::Missing("relays"));
        }

        for (index, relay) in relays.iter().enumerate() {
            if relay.host.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "relays",
                    format!("relay {index} has an empty host"),
                ));
            }

            if relay.port == 0 {
                return Err(ConfigError::invalid(
                    "relays",
                    format!("relay {index} ({}) has port 0", relay.host),
                ));
            }
        }

        Ok(Self {
            relays,
            filtered_domains: filtered_domains
                .into_iter()
                .filter(|domain| !domain.is_empty())
                .collect(),
        })
    }

    /// All relays, in selection order.
    #[must_use]
    pub fn relays(&self) -> &[RelayServer] {
        &self.relays
    }

    #[must_use]
    pub fn get(&self, index: RelayIndex) -> Option<&RelayServer> {
        self.relays.get(index)
    }

    /// The relay used for every unfiltered domain.
    #[must_use]
    pub fn primary(&self) -> &RelayServer {
        // Construction guarantees at least one relay.
        &self.relays[0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.relays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    #[must_use]
    pub fn is_filtered(&self, domain: &Domain) -> bool {
        self.filtered_domains.contains(domain)
    }

    pub fn filtered_domains(&self) -> impl Iterator<Item = &Domain> {
        self.filtered_domains.iter()
    }
}

impl TryFrom<RelayRegistryConfig> for RelayRegistry {
    type Error = ConfigError;

    fn try_from(config: RelayRegistryConfig) -> Result<Self, Self::Error> {
        Self::new(config.relays, config.filtered_domains)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn relay(host: &str) -> RelayServer {
        RelayServer::new(host, 587, "user", "secret")
    }

    #[test]
    fn test_registry_requires_a_relay() {
        let err = RelayRegistry::new(Vec::new(), []).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("relays")));
    }

    #[test]
    fn test_registry_rejects_bad_relays() {
        assert!(RelayRegistry::new(vec![relay(" ")], []).is_err());
        assert!(RelayRegistry::new(vec![RelayServer::new("smtp", 0, "", "")], []).is_err());
    }

    #[test]
    fn test_registry_primary_and_lookup() {
        let registry =
            RelayRegistry::new(vec![relay("one.example"), relay("two.example")], []).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.primary().host, "one.example");
        assert_eq!(registry.get(1).unwrap().host, "two.example");
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_registry_filtered_domains_case_insensitive() {
        let registry = RelayRegistry::new(
            vec![relay("one.example")],
            [Domain::new("Gmail.com"), Domain::new("")],
        )
        .unwrap();

        assert!(registry.is_filtered(&Domain::new("gmail.com")));
        assert!(registry.is_filtered(&Domain::new("GMAIL.COM")));
        assert!(!registry.is_filtered(&Domain::new("example.com")));
        assert_eq!(registry.filtered_domains().count(), 1);
    }

    #[test]
    fn test_registry_deserializes_from_ron() {
        let registry: RelayRegistry = ron::from_str(
            r#"(
                relays: [
                    (host: "smtp.sendgrid.net", port: 587, username: "apikey", password: "pw"),
                    (host: "smtp.mailgun.org", port: 465, username: "u", password: "p", tls: Implicit),
                ],
                filtered_domains: ["gmail.com"],
            )"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().tls, TlsPolicy::Implicit);
        assert!(registry.is_filtered(&Domain::new("gmail.com")));
    }

    #[test]
    fn test_registry_deserialize_validates() {
        let result: Result<RelayRegistry, _> = ron::from_str("(relays: [])");
        assert!(result.is_err());
    }

    #[test]
    fn test_relay_debug_redacts_password() {
        let rendered = format!("{:?}", relay("one.example"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_relay_address() {
        assert_eq!(relay("smtp.example").address(), "smtp.example:587");
    }
}
