//! Typed application configuration.
//!
//! Loaded once at startup from a TOML file (if present) and then layered with
//! `BRIDGE_*` environment variable overrides, in that order. Every field has
//! a sane default so the bridge can start with an empty or absent config file.

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub simulation: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            simulation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub esp: DeviceConfig,
    pub vj3350: DeviceConfig,
    pub vj6530: DeviceConfig,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            esp: DeviceConfig::default(),
            vj3350: DeviceConfig::default(),
            vj6530: DeviceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_s: f64,
    pub timeout_s: f64,
    pub down_after: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_s: 10.0,
            timeout_s: 3.0,
            down_after: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Top level configuration record. See the data-model section of the
/// design docs for field semantics.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub peer_base_url: String,
    pub peer_health_path: String,
    pub peer_watchdog_host: String,

    pub tls_verify: bool,
    pub http_timeout_s: f64,

    pub shared_secret: String,
    pub outbound_shared_secret: String,

    pub retry_base_s: f64,
    pub retry_cap_s: f64,

    pub watchdog: WatchdogConfig,
    pub devices: DevicesConfig,
    pub http: HttpConfig,

    pub data_dir: String,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            peer_base_url: String::new(),
            peer_health_path: "/health".to_string(),
            peer_watchdog_host: String::new(),
            tls_verify: true,
            http_timeout_s: 5.0,
            shared_secret: String::new(),
            outbound_shared_secret: String::new(),
            retry_base_s: 1.0,
            retry_cap_s: 60.0,
            watchdog: WatchdogConfig::default(),
            devices: DevicesConfig::default(),
            http: HttpConfig::default(),
            data_dir: "./data".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl fmt::Debug for AppConfig {
    /// Secrets are redacted; everything else is printed verbatim.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("peer_base_url", &self.peer_base_url)
            .field("peer_health_path", &self.peer_health_path)
            .field("peer_watchdog_host", &self.peer_watchdog_host)
            .field("tls_verify", &self.tls_verify)
            .field("http_timeout_s", &self.http_timeout_s)
            .field("shared_secret", &redact(&self.shared_secret))
            .field("outbound_shared_secret", &redact(&self.outbound_shared_secret))
            .field("retry_base_s", &self.retry_base_s)
            .field("retry_cap_s", &self.retry_cap_s)
            .field("watchdog", &self.watchdog)
            .field("devices", &self.devices)
            .field("http", &self.http)
            .field("data_dir", &self.data_dir)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("simulation", &self.simulation)
            .finish()
    }
}

impl fmt::Debug for DevicesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicesConfig")
            .field("esp", &self.esp)
            .field("vj3350", &self.vj3350)
            .field("vj6530", &self.vj6530)
            .finish()
    }
}

impl fmt::Debug for WatchdogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogConfig")
            .field("interval_s", &self.interval_s)
            .field("timeout_s", &self.timeout_s)
            .field("down_after", &self.down_after)
            .finish()
    }
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

fn redact(s: &str) -> String {
    if s.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}

impl AppConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}
