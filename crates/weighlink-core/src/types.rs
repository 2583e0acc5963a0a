use crate::{
    Result,
    constants::{DEVICE_ID_PUNCTUATION, MAX_DEVICE_ID_LENGTH},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier (unique registry key)
///
/// Ids are short ASCII strings such as `scale-1` or `dock.scanner:2`. They are
/// validated on construction and on deserialization, so a `DeviceId` in hand is
/// always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device id with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the id is empty, longer than
    /// [`MAX_DEVICE_ID_LENGTH`], or contains characters other than ASCII
    /// alphanumerics and [`DEVICE_ID_PUNCTUATION`].
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDeviceId {
                reason: "id must not be empty".to_string(),
            });
        }

        if id.len() > MAX_DEVICE_ID_LENGTH {
            return Err(Error::InvalidDeviceId {
                reason: format!(
                    "id must be at most {MAX_DEVICE_ID_LENGTH} chars, got {}",
                    id.len()
                ),
            });
        }

        if let Some(bad) = id
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !DEVICE_ID_PUNCTUATION.contains(c))
        {
            return Err(Error::InvalidDeviceId {
                reason: format!("invalid character {bad:?} in '{id}'"),
            });
        }

        Ok(DeviceId(id))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of measurement device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Weighing scale / weighbridge indicator.
    Scale,
    /// Barcode or QR scanner.
    Scanner,
    /// Environmental sensor (temperature, humidity, ...).
    Sensor,
}

impl DeviceType {
    /// Stable name used in notifications.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Scale => "Scale",
            DeviceType::Scanner => "Scanner",
            DeviceType::Sensor => "Sensor",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scale" => Ok(DeviceType::Scale),
            "scanner" => Ok(DeviceType::Scanner),
            "sensor" => Ok(DeviceType::Sensor),
            _ => Err(Error::UnknownDeviceType(s.to_string())),
        }
    }
}

/// Transport a driver talks over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// RS-232/RS-485 serial line.
    Serial,
    /// Raw TCP socket.
    Tcp,
    /// HTTP polling.
    Http,
    /// No real transport (mock/demo drivers).
    Simulated,
}

impl ProtocolType {
    /// Stable name used in logs and notifications.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolType::Serial => "Serial",
            ProtocolType::Tcp => "Tcp",
            ProtocolType::Http => "Http",
            ProtocolType::Simulated => "Simulated",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(ProtocolType::Serial),
            "tcp" => Ok(ProtocolType::Tcp),
            "http" => Ok(ProtocolType::Http),
            "simulated" => Ok(ProtocolType::Simulated),
            _ => Err(Error::UnknownProtocolType(s.to_string())),
        }
    }
}
