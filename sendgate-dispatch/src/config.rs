//! Dispatch configuration
//!
//! Everything here is plain data deserialized from the `dispatch`,
//! `rate_limit` and `counter_store` sections of the configuration file.

use std::{sync::Arc, time::Duration};

use sendgate_common::ConfigError;
use serde::{Deserialize, Serialize};

use crate::counter::{CounterStore, CounterStoreError, MemoryCounterStore, RedisCounterStore};

/// When attachment blobs are deleted after a send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupPolicy {
    /// Only after the relay accepted the message, so a redelivered record
    /// still finds its attachments.
    #[default]
    OnSuccess,

    /// After every send attempt, whatever its outcome.
    Always,
}

impl CleanupPolicy {
    #[must_use]
    pub const fn should_clean(self, sent: bool) -> bool {
        match self {
            Self::OnSuccess => sent,
            Self::Always => true,
        }
    }
}

const fn default_window() -> u64 {
    60
}

/// The rate limit window and key layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// How long a claimed `(relay, domain)` pair stays held
    ///
    /// Default: 60 seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Prepended to every counter key, to share a store between deployments
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            key_prefix: String::new(),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// # Errors
    /// If the window is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::invalid("rate_limit.window_secs", "must be non-zero"));
        }

        Ok(())
    }
}

/// Which counter store the rate limit runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum CounterStoreConfig {
    /// A Redis server, e.g. `Redis("redis://127.0.0.1:6379/7")`
    Redis(String),

    /// In-process counters; only correct for a single sendgate process
    #[default]
    Memory,
}

impl CounterStoreConfig {
    /// Whether other processes see the same counters.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Redis(_))
    }

    /// Connect to the configured store.
    ///
    /// # Errors
    /// If the Redis server cannot be reached
    pub async fn connect(&self) -> Result<Arc<dyn CounterStore>, CounterStoreError> {
        match self {
            Self::Redis(url) => Ok(Arc::new(RedisCounterStore::connect(url).await?)),
            Self::Memory => Ok(Arc::new(MemoryCounterStore::new())),
        }
    }
}

/// SMTP operation timeout configuration
///
/// Each relay conversation step gets its own limit, so a stalled relay fails
/// the send instead of holding a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpTimeouts {
    /// Connection establishment and greeting
    pub connect_secs: u64,
    /// EHLO/HELO
    pub ehlo_secs: u64,
    /// STARTTLS command and the TLS upgrade
    pub starttls_secs: u64,
    /// The whole AUTH exchange
    pub auth_secs: u64,
    pub mail_from_secs: u64,
    /// Each RCPT TO
    pub rcpt_to_secs: u64,
    /// DATA and message transmission
    ///
    /// Longer than the others to accommodate large attachments.
    pub data_secs: u64,
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            ehlo_secs: 30,
            starttls_secs: 30,
            auth_secs: 30,
            mail_from_secs: 30,
            rcpt_to_secs: 30,
            data_secs: 120,
            quit_secs: 10,
        }
    }
}

const fn default_parallelism() -> usize {
    4
}

const fn default_workers() -> usize {
    8
}

const fn default_shutdown_timeout() -> u64 {
    30
}

fn default_helo_domain() -> String {
    "localhost".to_string()
}

/// Dispatch pipeline and worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attachments fetched at once per message
    #[serde(default = "default_parallelism")]
    pub fetch_parallelism: usize,

    /// Attachments deleted at once per message
    #[serde(default = "default_parallelism")]
    pub cleanup_parallelism: usize,

    /// Messages processed at once by the worker
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub cleanup: CleanupPolicy,

    /// Name announced in EHLO
    #[serde(default = "default_helo_domain")]
    pub helo_domain: String,

    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    /// How long shutdown waits for in-flight messages before cancelling
    /// their sends
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fetch_parallelism: default_parallelism(),
            cleanup_parallelism: default_parallelism(),
            workers: default_workers(),
            cleanup: CleanupPolicy::default(),
            helo_domain: default_helo_domain(),
            smtp_timeouts: SmtpTimeouts::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl DispatchConfig {
    /// # Errors
    /// If any parallelism setting is zero or the HELO name is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_parallelism == 0 {
            return Err(ConfigError::invalid("dispatch.fetch_parallelism", "must be non-zero"));
        }

        if self.cleanup_parallelism == 0 {
            return Err(ConfigError::invalid("dispatch.cleanup_parallelism", "must be non-zero"));
        }

        if self.workers == 0 {
            return Err(ConfigError::invalid("dispatch.workers", "must be non-zero"));
        }

        if self.helo_domain.trim().is_empty() {
            return Err(ConfigError::Missing("dispatch.helo_domain"));
        }

        Ok(())
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
