//! Device lifecycle states.
//!
//! # Valid Transitions
//!
//! - Uninitialized → Disconnected → Connecting → Connected/Error
//! - Connected/Paused → Running, Running → Paused
//! - Disconnected/Connected/Paused/Error → Demo
//! - any → Disconnected (stop), any → Error (failure)
//!
//! `Error` reached after the reconnection scheduler gave up is terminal until
//! an explicit reconnect.
//!
//! # Examples
//!
//! ```
//! use weighlink_hardware::DeviceState;
//!
//! assert!(DeviceState::Connected.can_transition_to(DeviceState::Running));
//! assert!(!DeviceState::Disconnected.can_transition_to(DeviceState::Running));
//! assert!(DeviceState::Running.can_transition_to(DeviceState::Error));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Constructed, not yet wired up.
    Uninitialized,

    /// Idle with no open link.
    Disconnected,

    /// Link being opened.
    Connecting,

    /// Link open, not polling.
    Connected,

    /// Link open and polling.
    Running,

    /// Link open, polling suspended.
    Paused,

    /// Failed; may be retried by the reconnection scheduler.
    Error,

    /// Producing synthetic readings.
    Demo,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DeviceState {
    /// Stable name used in notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Uninitialized => "Uninitialized",
            DeviceState::Disconnected => "Disconnected",
            DeviceState::Connecting => "Connecting",
            DeviceState::Connected => "Connected",
            DeviceState::Running => "Running",
            DeviceState::Paused => "Paused",
            DeviceState::Error => "Error",
            DeviceState::Demo => "Demo",
        }
    }

    /// Check if transition to target state is valid from this state.
    ///
    /// Self-transitions are not transitions and return `false`.
    pub fn can_transition_to(&self, target: DeviceState) -> bool {
        if *self == target {
            return false;
        }

        matches!(
            (self, target),
            // Failure and stop are reachable from anywhere
            (_, DeviceState::Error)
            | (_, DeviceState::Disconnected)
            // Connection
            | (DeviceState::Disconnected | DeviceState::Error, DeviceState::Connecting)
            | (DeviceState::Connecting, DeviceState::Connected)
            // Polling
            | (DeviceState::Connected | DeviceState::Paused, DeviceState::Running)
            | (DeviceState::Running, DeviceState::Paused)
            // Demo mode
            | (
                DeviceState::Disconnected
                    | DeviceState::Connected
                    | DeviceState::Paused
                    | DeviceState::Error,
                DeviceState::Demo
            )
        )
    }

    /// Whether the transport link is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            DeviceState::Connected | DeviceState::Running | DeviceState::Paused
        )
    }

    /// Whether the polling loop should read from the device.
    pub fn is_polling(&self) -> bool {
        matches!(self, DeviceState::Running | DeviceState::Demo)
    }

    /// Whether `connect` is meaningful from this state.
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            DeviceState::Uninitialized | DeviceState::Disconnected | DeviceState::Error
        )
    }
}
