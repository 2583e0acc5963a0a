//! Common types shared across hardware device implementations.
//!
//! This module defines the descriptive metadata a device carries for its whole
//! lifetime and the status snapshot the device publishes after every change.

use crate::state::DeviceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use weighlink_core::{DeviceType, ProtocolType};

/// Static description of a device.
///
/// Set once when the device is constructed and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Kind of device.
    pub device_type: DeviceType,

    /// Display name (e.g., "Dock 3 weighbridge").
    pub name: String,

    /// Optional manufacturer name.
    #[serde(default)]
    pub manufacturer: Option<String>,

    /// Optional model identifier.
    #[serde(default)]
    pub model: Option<String>,

    /// Transport the driver speaks.
    pub protocol: ProtocolType,

    /// Declared capability tags (e.g., "tare", "zero", "continuous").
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Free-form extended properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DeviceMetadata {
    /// Create metadata with the required fields.
    pub fn new(device_type: DeviceType, name: impl Into<String>, protocol: ProtocolType) -> Self {
        Self {
            device_type,
            name: name.into(),
            manufacturer: None,
            model: None,
            protocol,
            capabilities: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Set the manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Declare a capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Add an extended property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Check whether a capability was declared.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Snapshot of a device's runtime status.
///
/// The device owns the live value; everybody else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Current lifecycle state.
    pub state: DeviceState,

    /// Human-readable description of the current state.
    pub description: String,

    /// When the link was last opened.
    pub connected_at: Option<DateTime<Utc>>,

    /// When polling was last started.
    pub started_at: Option<DateTime<Utc>>,

    /// Readings received from the driver (forwarded or not).
    pub received_count: u64,

    /// Errors observed since construction.
    pub error_count: u64,

    /// Message of the most recent error.
    pub last_error: Option<String>,

    /// When the most recent error happened.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// Status of a freshly constructed device.
    pub fn new() -> Self {
        Self {
            state: DeviceState::Uninitialized,
            description: "Not initialized".to_string(),
            connected_at: None,
            started_at: None,
            received_count: 0,
            error_count: 0,
            last_error: None,
            last_error_at: None,
        }
    }

    /// Record an error occurrence.
    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}
