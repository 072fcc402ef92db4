//! SASL mechanisms used to authenticate against a relay.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// A username and password for `AUTH`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supported authentication mechanisms, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// RFC 4616
    Plain,
    /// Obsolete, but still the only option on some relays
    Login,
}

impl Mechanism {
    pub const PREFERENCE: [Self; 2] = [Self::Plain, Self::Login];

    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if keyword.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// The base64 initial response sent on the `AUTH` line, if any.
    #[must_use]
    pub fn initial_response(self, credentials: &Credentials) -> Option<String> {
        match self {
            Self::Plain => Some(STANDARD.encode(format!(
                "\0{}\0{}",
                credentials.username, credentials.password
            ))),
            Self::Login => None,
        }
    }

    /// Answer a base64 encoded server challenge.
    ///
    /// # Errors
    /// If the challenge is not valid base64 or not one this mechanism expects
    pub fn respond(self, challenge: &str, credentials: &Credentials) -> Result<String> {
        let decoded = STANDARD
            .decode(challenge.trim())
            .map_err(|e| ClientError::AuthError(format!("Invalid challenge encoding: {e}")))?;
        let challenge = String::from_utf8_lossy(&decoded);
        let challenge = challenge.trim_end_matches(':').trim();

        match self {
            Self::Plain => Err(ClientError::AuthError(
                "PLAIN does not expect a challenge".to_string(),
            )),
            Self::Login if challenge.eq_ignore_ascii_case("username")
                || challenge.eq_ignore_ascii_case("user name") =>
            {
                Ok(STANDARD.encode(&credentials.username))
            }
            Self::Login if challenge.eq_ignore_ascii_case("password") => {
                Ok(STANDARD.encode(&credentials.password))
            }
            Self::Login => Err(ClientError::AuthError(format!(
                "Unrecognised challenge: {challenge}"
            ))),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        })
    }
}
