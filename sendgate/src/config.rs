//! The sendgate configuration file
//!
//! ```ron
//! (
//!     relays: [
//!         (host: "smtp-a.example.com", port: 587, username: "a", password: "secret"),
//!         (host: "smtp-b.example.com", port: 587, username: "b", password: "secret"),
//!     ],
//!     filtered_domains: ["gmail.com"],
//!     counter_store: Redis("redis://127.0.0.1:6379/0"),
//!     attachments: File(path: "/var/spool/sendgate/attachments"),
//!     queue: (backend: File(path: "/var/spool/sendgate/queue")),
//! )
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use sendgate_common::{ConfigError, Domain, RelayRegistry, RelayServer};
use sendgate_dispatch::{CounterStoreConfig, DispatchConfig, RateLimitConfig};
use sendgate_intake::IntakeConfig;
use sendgate_spool::{AttachmentStoreConfig, QueueConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SENDGATE_CONFIG";

/// Searched in order when [`CONFIG_ENV`] is unset
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./sendgate.config.ron", "/etc/sendgate/sendgate.config.ron"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Relays in selection order; the first also carries all unfiltered mail
    pub relays: Vec<RelayServer>,

    /// Recipient domains that are rate limited per relay
    #[serde(default)]
    pub filtered_domains: Vec<Domain>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub counter_store: CounterStoreConfig,

    #[serde(default)]
    pub attachments: AttachmentStoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub intake: IntakeConfig,
}

impl Config {
    /// Parse and validate a RON document.
    ///
    /// # Errors
    /// If the document does not parse or fails validation
    pub fn from_ron(source: &str) -> anyhow::Result<Self> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    ///
    /// # Errors
    /// If the file cannot be read, does not parse or fails validation
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&source).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// # Errors
    /// The first setting that is missing or out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry()?;
        self.rate_limit.validate()?;
        self.dispatch.validate()?;
        self.intake.validate()
    }

    /// The relay registry described by `relays` and `filtered_domains`.
    ///
    /// # Errors
    /// If no relays are configured or one of them is unusable
    pub fn registry(&self) -> Result<RelayRegistry, ConfigError> {
        RelayRegistry::new(self.relays.clone(), self.filtered_domains.iter().cloned())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `SENDGATE_CONFIG` environment variable
/// 2. ./sendgate.config.ron (current working directory)
/// 3. /etc/sendgate/sendgate.config.ron (system-wide config)
///
/// # Errors
/// If `SENDGATE_CONFIG` names a missing file, or no default path exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    locate(
        std::env::var(CONFIG_ENV).ok().as_deref(),
        &DEFAULT_CONFIG_PATHS.map(PathBuf::from),
    )
}

fn locate(env_path: Option<&str>, default_paths: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    for path in default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
