//! Device adapters: the thing that actually "executes" a parsed command
//! against a channel, in simulation or live mode, and renders a reply line.

use async_trait::async_trait;
use bridge_common::NakReason;
use bridge_config::DeviceConfig;
use bridge_parser::{CommandValue, ParsedCommand};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Render a NAK reply line for a given business key and reason.
pub fn nak(pkey: &str, reason: NakReason) -> String {
    format!("{pkey}=NAK_{reason}")
}

/// Render an ACK reply line for a successful write.
pub fn ack(pkey: &str, value: &str) -> String {
    format!("ACK_{pkey}={value}")
}

/// Render a read-success reply line.
pub fn read_ok(pkey: &str, value: &str) -> String {
    format!("{pkey}={value}")
}

#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Execute one parsed command and produce the reply line to hand back
    /// to the peer. Device-level failures are folded into `NAK_*` replies,
    /// never propagated as errors -- a device NAK is a business outcome.
    async fn execute(&self, cmd: &ParsedCommand) -> String;
}

/// In-memory simulation of a device: stores the last written value per key
/// and echoes it back on read, falling back to a configured default.
pub struct SimulatedAdapter {
    values: Mutex<HashMap<String, String>>,
    default_value: String,
}

impl SimulatedAdapter {
    pub fn new(default_value: impl Into<String>) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            default_value: default_value.into(),
        }
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedAdapter {
    async fn execute(&self, cmd: &ParsedCommand) -> String {
        match &cmd.value {
            CommandValue::Read => {
                let values = self.values.lock();
                let value = values
                    .get(&cmd.pkey)
                    .cloned()
                    .unwrap_or_else(|| self.default_value.clone());
                read_ok(&cmd.pkey, &value)
            }
            CommandValue::Write(value) => {
                self.values.lock().insert(cmd.pkey.clone(), value.clone());
                ack(&cmd.pkey, value)
            }
        }
    }
}

/// Thin TCP-connect based adapter for channels not running in simulation.
/// The wire dialect of the real controller/printers is out of scope; this
/// adapter proves out the failure taxonomy (unreachable vs. comm error vs.
/// bad response) without inventing protocol detail the device doesn't define.
pub struct LiveAdapter {
    config: DeviceConfig,
    connect_timeout: Duration,
}

impl LiveAdapter {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            connect_timeout: Duration::from_secs(2),
        }
    }

    fn command_line(cmd: &ParsedCommand) -> String {
        match &cmd.value {
            CommandValue::Read => format!("{}{}=?\n", cmd.ptype, cmd.pid),
            CommandValue::Write(v) => format!("{}{}={v}\n", cmd.ptype, cmd.pid),
        }
    }
}

#[async_trait]
impl DeviceAdapter for LiveAdapter {
    async fn execute(&self, cmd: &ParsedCommand) -> String {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "device unreachable");
                return nak(&cmd.pkey, NakReason::DeviceDown);
            }
            Err(_) => {
                warn!(addr = %addr, "device connect timed out");
                return nak(&cmd.pkey, NakReason::DeviceDown);
            }
        };

        let mut stream = stream;
        let line = Self::command_line(cmd);
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            debug!(error = %e, "device write failed");
            return nak(&cmd.pkey, NakReason::DeviceComm);
        }

        let mut buf = [0u8; 256];
        let read = tokio::time::timeout(self.connect_timeout, stream.read(&mut buf)).await;
        match read {
            Ok(Ok(n)) if n > 0 => {
                let response = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                if response.is_empty() {
                    nak(&cmd.pkey, NakReason::DeviceBadResponse)
                } else {
                    response
                }
            }
            Ok(Ok(_)) => nak(&cmd.pkey, NakReason::DeviceBadResponse),
            Ok(Err(e)) => {
                debug!(error = %e, "device read failed");
                nak(&cmd.pkey, NakReason::DeviceComm)
            }
            Err(_) => nak(&cmd.pkey, NakReason::DeviceComm),
        }
    }
}

/// Registry mapping a channel to its adapter, built once at startup from
/// per-device configuration.
pub struct AdapterRegistry {
    pub vj6530: Arc<dyn DeviceAdapter>,
    pub vj3350: Arc<dyn DeviceAdapter>,
    pub esp_plc: Arc<dyn DeviceAdapter>,
    pub raspi: Arc<dyn DeviceAdapter>,
}

impl AdapterRegistry {
    pub fn for_channel(&self, channel: bridge_common::Channel) -> &Arc<dyn DeviceAdapter> {
        use bridge_common::Channel::*;
        match channel {
            Vj6530 => &self.vj6530,
            Vj3350 => &self.vj3350,
            EspPlc => &self.esp_plc,
            Raspi => &self.raspi,
        }
    }

    pub fn from_config(devices: &bridge_config::DevicesConfig) -> Self {
        let build = |cfg: &DeviceConfig| -> Arc<dyn DeviceAdapter> {
            if cfg.simulation {
                Arc::new(SimulatedAdapter::new("0"))
            } else {
                Arc::new(LiveAdapter::new(cfg.clone()))
            }
        };
        Self {
            vj6530: build(&devices.vj6530),
            vj3350: build(&devices.vj3350),
            esp_plc: build(&devices.esp),
            raspi: Arc::new(SimulatedAdapter::new("0")),
        }
    }
}
