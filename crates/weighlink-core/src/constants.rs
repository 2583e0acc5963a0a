//! Default values shared by device descriptors and the supervisor.
//!
//! Descriptors loaded from configuration fall back to these values when a
//! field is omitted, so every crate in the workspace agrees on the same
//! defaults.
//!
//! # Examples
//!
//! ```
//! use weighlink_core::constants::*;
//! use std::time::Duration;
//!
//! let poll = Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS);
//! assert_eq!(poll.as_millis(), 500);
//! assert!(DEFAULT_MAX_BACKOFF_MS >= DEFAULT_RETRY_INTERVAL_MS);
//! ```

// ============================================================================
// Device Identification
// ============================================================================

/// Maximum length of a device id (characters).
pub const MAX_DEVICE_ID_LENGTH: usize = 64;

/// Punctuation allowed in a device id besides ASCII alphanumerics.
pub const DEVICE_ID_PUNCTUATION: &[char] = &['-', '_', '.', ':'];

// ============================================================================
// Polling & Connection
// ============================================================================

/// Default interval between two driver reads (milliseconds).
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 500;

/// Default upper bound for a single connection attempt (milliseconds).
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Reconnection
// ============================================================================

/// Default base delay before the first reconnection attempt (milliseconds).
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Default cap for exponential backoff (milliseconds).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

// ============================================================================
// Data Filtering
// ============================================================================

/// Default minimum absolute change for a reading to be forwarded early.
pub const DEFAULT_MIN_CHANGE_THRESHOLD: f64 = 0.0;

/// Default minimum interval between forwarded readings (milliseconds).
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 0;

// ============================================================================
// Health
// ============================================================================

/// Number of observations kept in the health window.
pub const DEFAULT_HEALTH_WINDOW: usize = 100;

/// Error rate at or above which a device stops being healthy.
pub const DEFAULT_DEGRADED_ERROR_RATE: f64 = 0.05;

/// Error rate at or above which a device is unhealthy.
pub const DEFAULT_UNHEALTHY_ERROR_RATE: f64 = 0.25;

/// Missed polling intervals after which the heartbeat counts as absent.
pub const DEFAULT_MISSED_HEARTBEATS: u32 = 3;
