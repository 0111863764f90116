//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "bridge.toml",
    "./config/config.toml",
    "/etc/databridge/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("BRIDGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("BRIDGE_PEER_BASE_URL") {
            config.peer_base_url = val;
        }
        if let Ok(val) = env::var("BRIDGE_PEER_HEALTH_PATH") {
            config.peer_health_path = val;
        }
        if let Ok(val) = env::var("BRIDGE_PEER_WATCHDOG_HOST") {
            config.peer_watchdog_host = val;
        }
        if let Ok(val) = env::var("BRIDGE_TLS_VERIFY") {
            config.tls_verify = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("BRIDGE_HTTP_TIMEOUT_S") {
            if let Ok(v) = val.parse() {
                config.http_timeout_s = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_SHARED_SECRET") {
            config.shared_secret = val;
        }
        if let Ok(val) = env::var("BRIDGE_OUTBOUND_SHARED_SECRET") {
            config.outbound_shared_secret = val;
        }
        if let Ok(val) = env::var("BRIDGE_RETRY_BASE_S") {
            if let Ok(v) = val.parse() {
                config.retry_base_s = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_RETRY_CAP_S") {
            if let Ok(v) = val.parse() {
                config.retry_cap_s = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_WATCHDOG_INTERVAL_S") {
            if let Ok(v) = val.parse() {
                config.watchdog.interval_s = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_WATCHDOG_TIMEOUT_S") {
            if let Ok(v) = val.parse() {
                config.watchdog.timeout_s = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_WATCHDOG_DOWN_AFTER") {
            if let Ok(v) = val.parse() {
                config.watchdog.down_after = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("BRIDGE_HTTP_PORT") {
            if let Ok(v) = val.parse() {
                config.http.port = v;
            }
        }
        if let Ok(val) = env::var("BRIDGE_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            config.log_format = val;
        }

        self.apply_device_override(&mut config.devices.esp, "ESP");
        self.apply_device_override(&mut config.devices.vj3350, "VJ3350");
        self.apply_device_override(&mut config.devices.vj6530, "VJ6530");
    }

    fn apply_device_override(&self, device: &mut crate::DeviceConfig, prefix: &str) {
        if let Ok(val) = env::var(format!("BRIDGE_{prefix}_HOST")) {
            device.host = val;
        }
        if let Ok(val) = env::var(format!("BRIDGE_{prefix}_PORT")) {
            if let Ok(v) = val.parse() {
                device.port = v;
            }
        }
        if let Ok(val) = env::var(format!("BRIDGE_{prefix}_SIMULATION")) {
            device.simulation = val.parse().unwrap_or(true);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
