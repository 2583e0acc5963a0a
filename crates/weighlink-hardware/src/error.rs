//! Error types for hardware operations.
//!
//! This module defines the error taxonomy shared by drivers, devices and the
//! registry. Errors fall into a few families that decide how the supervisor
//! reacts:
//!
//! - connection-class ([`Disconnected`], [`Timeout`], [`Connection`], [`Io`]):
//!   recoverable, handed to the reconnection scheduler;
//! - [`Protocol`]: the offending sample is dropped, device state is unchanged;
//! - [`Fatal`]: the driver gave up, the device moves to `Error` without retry;
//! - caller errors ([`InvalidState`], [`DuplicateIdentity`], [`DeviceNotFound`],
//!   [`Configuration`]): returned synchronously to whoever issued the call.
//!
//! [`Disconnected`]: HardwareError::Disconnected
//! [`Timeout`]: HardwareError::Timeout
//! [`Connection`]: HardwareError::Connection
//! [`Io`]: HardwareError::Io
//! [`Protocol`]: HardwareError::Protocol
//! [`Fatal`]: HardwareError::Fatal
//! [`InvalidState`]: HardwareError::InvalidState
//! [`DuplicateIdentity`]: HardwareError::DuplicateIdentity
//! [`DeviceNotFound`]: HardwareError::DeviceNotFound
//! [`Configuration`]: HardwareError::Configuration

use crate::state::DeviceState;
use weighlink_core::DeviceId;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Transport-level failure (port busy, connection refused, reset).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Malformed or unexpected data from the device.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Driver judged the fault unrecoverable.
    #[error("Fatal device error: {message}")]
    Fatal { message: String },

    /// Operation is not valid in the device's current state.
    #[error("Cannot {operation} while device is {state}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    /// A device with the same id is already registered.
    #[error("Device {id} is already registered")]
    DuplicateIdentity { id: DeviceId },

    /// No device with this id is registered.
    #[error("Device {id} not found")]
    DeviceNotFound { id: DeviceId },

    /// Reconnection gave up after the configured number of attempts.
    #[error("Reconnection gave up after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Delivering a notification to the sink failed.
    #[error("Notification delivery failed: {message}")]
    NotificationDelivery { message: String },

    /// Device or registry configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The manager no longer accepts devices.
    #[error("Device manager has been shut down")]
    ManagerShutDown,

    /// Invalid identifier or classification.
    #[error(transparent)]
    Core(#[from] weighlink_core::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Create a new state-conflict error.
    pub fn invalid_state(operation: &'static str, state: DeviceState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Create a new notification delivery error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::NotificationDelivery {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error means the link to the device was lost.
    ///
    /// Connection-class errors are the ones the reconnection scheduler acts on.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::Timeout { .. } | Self::Connection { .. } | Self::Io(_)
        )
    }

    /// Whether this error is confined to a single sample.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Whether the device can keep operating (possibly after a reconnect).
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error() || self.is_protocol_error()
    }
}
