//! Intake server configuration

use std::time::Duration;

use sendgate_common::ConfigError;
use serde::Deserialize;

/// Configuration for the intake HTTP endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntakeConfig {
    /// Address to bind the intake server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address, port 8080)
    /// - `0.0.0.0:8080` (IPv4 any address, port 8080)
    /// - `127.0.0.1:8080` (localhost only, port 8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upper bound on handling one request, attachment upload included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body, all parts together
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    60
}

const fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl IntakeConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// # Errors
    /// If the timeout or body limit is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "intake.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::invalid(
                "intake.max_body_bytes",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}
