//! Shared value types used across the bridge crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A device channel the bridge can route a command to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Vj6530,
    Vj3350,
    EspPlc,
    Raspi,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Vj6530 => "vj6530",
            Channel::Vj3350 => "vj3350",
            Channel::EspPlc => "esp-plc",
            Channel::Raspi => "raspi",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of negative-acknowledgement reasons a device adapter or the
/// parser may report. Rendered verbatim into `NAK_<reason>` reply lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakReason {
    ReadOnly,
    UnknownParam,
    OutOfRange,
    DeviceDown,
    DeviceComm,
    DeviceBadResponse,
    DeviceRejected,
    UnknownDevice,
    MappingMissing,
    ParseError,
}

impl NakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NakReason::ReadOnly => "ReadOnly",
            NakReason::UnknownParam => "UnknownParam",
            NakReason::OutOfRange => "OutOfRange",
            NakReason::DeviceDown => "DeviceDown",
            NakReason::DeviceComm => "DeviceComm",
            NakReason::DeviceBadResponse => "DeviceBadResponse",
            NakReason::DeviceRejected => "DeviceRejected",
            NakReason::UnknownDevice => "UnknownDevice",
            NakReason::MappingMissing => "MappingMissing",
            NakReason::ParseError => "ParseError",
        }
    }
}

impl fmt::Display for NakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record state shared by the Inbox/Outbox lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Done,
    Failed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Pending => "pending",
            RecordState::Done => "done",
            RecordState::Failed => "failed",
        }
    }
}

/// Outbox-specific terminal failure state, distinct from Inbox's `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    Pending,
    Done,
    FailedPermanent,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "pending",
            OutboxState::Done => "done",
            OutboxState::FailedPermanent => "failed_permanent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxState::Pending),
            "done" => Some(OutboxState::Done),
            "failed_permanent" => Some(OutboxState::FailedPermanent),
            _ => None,
        }
    }
}
