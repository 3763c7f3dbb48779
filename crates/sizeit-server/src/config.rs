//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration files (`size-it.toml`, `/etc/size-it/size-it.toml`,
//!   `~/.config/size-it/size-it.toml`), later files overriding earlier ones
//! - Environment variables (`SIZE_IT__PORT`, `SIZE_IT__LIVE__GRACE_PERIOD_MS`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sizeit_live::LiveConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "~/.config/size-it/size-it.toml",
    "/etc/size-it/size-it.toml",
    "size-it.toml",
];

const ENV_PREFIX: &str = "SIZE_IT";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base path every route is mounted under, empty for the root.
    #[serde(default)]
    pub path: String,

    /// Live collaboration engine.
    #[serde(default)]
    pub live: LiveSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Live collaboration engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSection {
    /// Grace period after a disconnect, in milliseconds.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Empty-room sweep period, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Events buffered per connected client.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_grace_period() -> u64 {
    5_000 // 5 seconds
}

fn default_sweep_interval() -> u64 {
    3_600_000 // 1 hour
}

fn default_mailbox_capacity() -> usize {
    sizeit_live::DEFAULT_MAILBOX_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: String::new(),
            live: LiveSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            sweep_interval_ms: default_sweep_interval(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl LiveSection {
    /// Engine configuration.
    #[must_use]
    pub fn to_live_config(&self) -> LiveConfig {
        LiveConfig {
            grace_period: Duration::from_millis(self.grace_period_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

impl Config {
    /// Load configuration from the default files and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);

        Self::load_from(&CONFIG_PATHS, environment)
    }

    fn load_from(paths: &[&str], environment: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        for path in paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                tracing::debug!(path = %expanded, "Reading config file");
                builder = builder.add_source(config::File::new(
                    expanded.as_ref(),
                    config::FileFormat::Toml,
                ));
            }
        }

        builder
            .add_source(environment)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Base path without a trailing slash.
    #[must_use]
    pub fn base_path(&self) -> &str {
        self.path.trim_end_matches('/')
    }
}
