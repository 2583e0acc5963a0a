//! Events emitted by devices.
//!
//! Every device owns one outbound channel of [`DeviceEvent`] values. The
//! payload of data events is the driver's own reading type, so consumers that
//! hold a concrete `Device<D>` receive fully typed readings.

use crate::state::DeviceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use weighlink_core::DeviceId;

/// How serious an error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    /// Stable name used in notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "Info",
            ErrorSeverity::Warning => "Warning",
            ErrorSeverity::Error => "Error",
            ErrorSeverity::Critical => "Critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub device_id: DeviceId,
    pub old_state: DeviceState,
    pub new_state: DeviceState,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// An error observed by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOccurred {
    pub device_id: DeviceId,
    pub message: String,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

/// A reading that passed the data filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReceived<P> {
    pub device_id: DeviceId,
    pub payload: P,
    /// Per-device, strictly increasing, starting at 1.
    pub sequence_number: u64,
    /// Not produced by live hardware (demo mode).
    pub is_synthetic: bool,
    pub timestamp: DateTime<Utc>,
}

/// Anything a device reports to its subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent<P> {
    StatusChanged(StatusChanged),
    ErrorOccurred(ErrorOccurred),
    DataReceived(DataReceived<P>),
}

impl<P> DeviceEvent<P> {
    /// Id of the device that emitted the event.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::StatusChanged(e) => &e.device_id,
            DeviceEvent::ErrorOccurred(e) => &e.device_id,
            DeviceEvent::DataReceived(e) => &e.device_id,
        }
    }

    /// When the event was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::StatusChanged(e) => e.timestamp,
            DeviceEvent::ErrorOccurred(e) => e.timestamp,
            DeviceEvent::DataReceived(e) => e.timestamp,
        }
    }
}
