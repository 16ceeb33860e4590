//! # Settings
//!
//! Endpoint and pool settings, read once at startup. A properties-style file
//! is enough:
//!
//! ```text
//! host=127.0.0.1
//! port=6379
//! ```
//!
//! `.toml` and `.json` files are read in their own format; anything else is
//! parsed as `key=value` lines. `KVBRIDGE_*` environment variables override
//! file values (e.g. `KVBRIDGE_PORT=6380`).
//!
//! Failing to load settings is fatal for the caller; nothing here retries.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ClientConfig, RECONNECT_BACKOFF, SOFT_DELETE_DELAY};
use crate::pool::ExhaustedPolicy;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Source(#[from] config::ConfigError),
    #[error("invalid settings: {0}")]
    Invalid(&'static str),
}

/// Store endpoint and pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Wait for a free connection instead of failing when the pool is full.
    #[serde(default = "default_block_when_exhausted")]
    pub block_when_exhausted: bool,
    /// Upper bound on that wait; unbounded when absent.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    /// Connect, read and write timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_soft_delete_delay_ms")]
    pub soft_delete_delay_ms: u64,
}

fn default_max_total() -> usize {
    8
}

fn default_max_idle() -> usize {
    8
}

fn default_block_when_exhausted() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_reconnect_backoff_ms() -> u64 {
    RECONNECT_BACKOFF.as_millis() as u64
}

fn default_soft_delete_delay_ms() -> u64 {
    SOFT_DELETE_DELAY.as_millis() as u64
}

impl StoreSettings {
    /// Loads settings from `path`, then applies `KVBRIDGE_*` overrides.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Ini,
        };
        let source = Config::builder()
            .add_source(File::from(path).format(format))
            .add_source(Environment::with_prefix("KVBRIDGE").try_parsing(true))
            .build()?;

        let settings: StoreSettings = source.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the invariants the pool relies on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::Invalid("host is empty"));
        }
        if self.port == 0 {
            return Err(SettingsError::Invalid("port must be non-zero"));
        }
        if self.max_total == 0 {
            return Err(SettingsError::Invalid("max_total must be positive"));
        }
        if self.max_idle > self.max_total {
            return Err(SettingsError::Invalid("max_idle exceeds max_total"));
        }
        if self.timeout_ms == 0 {
            return Err(SettingsError::Invalid("timeout_ms must be positive"));
        }
        if self.reconnect_backoff_ms == 0 {
            return Err(SettingsError::Invalid("reconnect_backoff_ms must be positive"));
        }
        Ok(())
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Runtime client configuration derived from these settings.
    pub fn client_config(&self) -> ClientConfig {
        let timeout = Some(Duration::from_millis(self.timeout_ms));
        let exhausted = if self.block_when_exhausted {
            ExhaustedPolicy::Block {
                max_wait: self.max_wait_ms.map(Duration::from_millis),
            }
        } else {
            ExhaustedPolicy::FailFast
        };
        ClientConfig {
            addr: self.addr(),
            max_idle: self.max_idle,
            max_total: self.max_total,
            exhausted,
            read_timeout: timeout,
            write_timeout: timeout,
            connect_timeout: timeout,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            soft_delete_delay: Duration::from_millis(self.soft_delete_delay_ms),
            ..ClientConfig::default()
        }
    }
}
