//! Device descriptors and manager settings.
//!
//! Descriptors are supplied at startup (typically from a JSON file) and never
//! mutated by the supervisor afterwards. Durations are written in
//! milliseconds:
//!
//! ```json
//! {
//!   "devices": [
//!     {
//!       "id": "scale-1",
//!       "metadata": { "device_type": "Scale", "name": "Dock 1", "protocol": "Serial" },
//!       "protocol": { "type": "serial", "port": "/dev/ttyUSB0", "baud_rate": 9600 },
//!       "reconnection": { "retry_interval_ms": 500, "max_retries": 5 },
//!       "filter": { "enabled": true, "min_change_threshold": 0.5, "min_interval_ms": 1000 },
//!       "polling_interval_ms": 250
//!     }
//!   ]
//! }
//! ```

use crate::device::Device;
use crate::error::{HardwareError, Result};
use crate::filter::DataFilterConfig;
use crate::reconnect::ReconnectionPolicy;
use crate::traits::DeviceDriver;
use crate::types::DeviceMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use weighlink_core::constants::{DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_POLLING_INTERVAL_MS};
use weighlink_core::{DeviceId, ProtocolType};

/// Serialize a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Registry-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Upper bound for one notification delivery.
    pub notify_timeout: Duration,

    /// Upper bound for a device loop to wind down on unregister/shutdown.
    pub shutdown_timeout: Duration,

    /// How often health snapshots are refreshed without any event.
    pub health_tick: Duration,

    /// Capacity of each device's command queue.
    pub command_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(3),
            health_tick: Duration::from_secs(1),
            command_capacity: 32,
        }
    }
}

/// Transport settings handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolSettings {
    Serial {
        port: String,
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default)]
        parity: Parity,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Http {
        url: String,
    },
    Simulated,
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_polling_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS)
}

fn default_connection_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS)
}

impl ProtocolSettings {
    /// Transport family of these settings.
    pub fn protocol_type(&self) -> ProtocolType {
        match self {
            ProtocolSettings::Serial { .. } => ProtocolType::Serial,
            ProtocolSettings::Tcp { .. } => ProtocolType::Tcp,
            ProtocolSettings::Http { .. } => ProtocolType::Http,
            ProtocolSettings::Simulated => ProtocolType::Simulated,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ProtocolSettings::Serial {
                port,
                baud_rate,
                data_bits,
                stop_bits,
                ..
            } => {
                if port.trim().is_empty() {
                    return Err(HardwareError::configuration("serial port must not be empty"));
                }
                if *baud_rate == 0 {
                    return Err(HardwareError::configuration("baud rate must be positive"));
                }
                if !(5..=8).contains(data_bits) {
                    return Err(HardwareError::configuration(format!(
                        "data bits must be 5-8, got {data_bits}"
                    )));
                }
                if !(1..=2).contains(stop_bits) {
                    return Err(HardwareError::configuration(format!(
                        "stop bits must be 1 or 2, got {stop_bits}"
                    )));
                }
            }
            ProtocolSettings::Tcp { host, port } => {
                if host.trim().is_empty() || *port == 0 {
                    return Err(HardwareError::configuration(format!(
                        "invalid TCP endpoint {host}:{port}"
                    )));
                }
            }
            ProtocolSettings::Http { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(HardwareError::configuration(format!(
                        "HTTP url must start with http:// or https://, got {url}"
                    )));
                }
            }
            ProtocolSettings::Simulated => {}
        }
        Ok(())
    }
}

/// Everything needed to construct and supervise one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,

    pub metadata: DeviceMetadata,

    pub protocol: ProtocolSettings,

    #[serde(default)]
    pub reconnection: ReconnectionPolicy,

    #[serde(default)]
    pub filter: DataFilterConfig,

    #[serde(
        rename = "polling_interval_ms",
        with = "duration_ms",
        default = "default_polling_interval"
    )]
    pub polling_interval: Duration,

    #[serde(
        rename = "connection_timeout_ms",
        with = "duration_ms",
        default = "default_connection_timeout"
    )]
    pub connection_timeout: Duration,
}

impl DeviceDescriptor {
    /// Check the descriptor for values the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        let context = |e: HardwareError| match e {
            HardwareError::Configuration { message } => {
                HardwareError::configuration(format!("{}: {message}", self.id))
            }
            other => other,
        };

        self.protocol.validate().map_err(context)?;

        if self.protocol.protocol_type() != self.metadata.protocol {
            return Err(context(HardwareError::configuration(format!(
                "metadata declares {} but protocol settings are {}",
                self.metadata.protocol,
                self.protocol.protocol_type()
            ))));
        }
        if self.polling_interval.is_zero() {
            return Err(context(HardwareError::configuration(
                "polling interval must be positive",
            )));
        }
        if self.connection_timeout.is_zero() {
            return Err(context(HardwareError::configuration(
                "connection timeout must be positive",
            )));
        }
        if self.reconnection.retry_interval.is_zero() && self.reconnection.enabled {
            return Err(context(HardwareError::configuration(
                "retry interval must be positive when reconnection is enabled",
            )));
        }
        if !(self.filter.min_change_threshold >= 0.0) {
            return Err(context(HardwareError::configuration(
                "filter threshold must be a non-negative number",
            )));
        }
        Ok(())
    }

    /// Wrap `driver` in a device configured by this descriptor.
    ///
    /// The descriptor's metadata takes precedence over the driver's own.
    pub fn build_device<D: DeviceDriver>(&self, driver: D) -> Result<Device<D>> {
        self.validate()?;

        Ok(Device::with_metadata(self.id.clone(), self.metadata.clone(), driver)
            .with_filter(self.filter.clone())
            .with_reconnection_policy(self.reconnection.clone())
            .with_polling_interval(self.polling_interval)
            .with_connection_timeout(self.connection_timeout))
    }
}

/// A list of descriptors loaded together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSet {
    pub devices: Vec<DeviceDescriptor>,
}

impl DescriptorSet {
    /// Parse and validate descriptors from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let set: DescriptorSet = serde_json::from_str(json)
            .map_err(|e| HardwareError::configuration(format!("invalid descriptor JSON: {e}")))?;
        set.validate()?;
        Ok(set)
    }

    /// Read, parse and validate a descriptor file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate every descriptor and reject duplicate ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.devices {
            descriptor.validate()?;
            if !seen.insert(&descriptor.id) {
                return Err(HardwareError::configuration(format!(
                    "duplicate device id {}",
                    descriptor.id
                )));
            }
        }
        Ok(())
    }

    /// Find a descriptor by id.
    pub fn get(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| &d.id == id)
    }
}
