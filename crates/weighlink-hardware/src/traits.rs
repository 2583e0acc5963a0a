//! Hardware driver trait definitions.
//!
//! This module defines the contract between the supervision layer and the
//! protocol-specific drivers (serial scales, TCP scanners, HTTP-polled sensors).
//! A driver only knows how to open, read and close its transport; the lifecycle
//! state machine, filtering, health tracking and event emission are provided by
//! [`Device`](crate::device::Device), which wraps any [`DeviceDriver`].
//!
//! Methods are declared as `fn .. -> impl Future<Output = ..> + Send` so that
//! devices can be moved into Tokio tasks. Implementors can still write plain
//! `async fn` in their `impl` blocks:
//!
//! ```no_run
//! use weighlink_hardware::traits::DeviceDriver;
//! use weighlink_hardware::types::DeviceMetadata;
//! use weighlink_hardware::Result;
//! use weighlink_core::{DeviceType, ProtocolType};
//!
//! struct Thermometer {
//!     metadata: DeviceMetadata,
//! }
//!
//! impl DeviceDriver for Thermometer {
//!     type Payload = f64;
//!
//!     fn metadata(&self) -> &DeviceMetadata {
//!         &self.metadata
//!     }
//!
//!     async fn open(&mut self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn close(&mut self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn read(&mut self) -> Result<Option<f64>> {
//!         Ok(Some(21.5))
//!     }
//! }
//! ```

use crate::error::Result;
use crate::types::DeviceMetadata;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;

/// A single sample produced by a driver.
///
/// The data filter uses [`value`](Reading::value) to detect meaningful
/// changes. Readings without a numeric value can offer a
/// [`dedup_key`](Reading::dedup_key) so that repeats of the same reading
/// (e.g., one barcode scanned twice) can still be suppressed.
pub trait Reading: Debug + Clone + Serialize + Send + Sync + 'static {
    /// Numeric magnitude of the reading, if it has one.
    fn value(&self) -> Option<f64>;

    /// Identity used to detect repeated non-numeric readings.
    fn dedup_key(&self) -> Option<String> {
        None
    }
}

impl Reading for f64 {
    fn value(&self) -> Option<f64> {
        Some(*self)
    }
}

impl Reading for String {
    fn value(&self) -> Option<f64> {
        None
    }

    fn dedup_key(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// Protocol-specific driver for one physical device.
///
/// # Contract
///
/// - [`open`](Self::open) is only called when the link is closed.
/// - [`read`](Self::read) is called once per polling tick while the device is
///   running. `Ok(None)` means the device answered but had nothing new; it
///   still counts as a heartbeat.
/// - Errors are classified by [`HardwareError`](crate::HardwareError):
///   connection-class errors trigger reconnection, protocol errors drop the
///   sample, fatal errors park the device in `Error`.
/// - [`close`](Self::close) must be safe to call on an already closed link.
pub trait DeviceDriver: Send + 'static {
    /// Reading type produced by this driver.
    type Payload: Reading;

    /// Static description of the device.
    fn metadata(&self) -> &DeviceMetadata;

    /// Open the transport.
    fn open(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Close the transport.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Read one sample.
    fn read(&mut self) -> impl Future<Output = Result<Option<Self::Payload>>> + Send;

    /// Produce a synthetic sample for demo mode.
    ///
    /// Drivers without a demo source return `None`, in which case demo mode
    /// simply produces no data.
    fn simulate(&mut self) -> Option<Self::Payload> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_reading() {
        assert_eq!(42.0_f64.value(), Some(42.0));
        assert_eq!(42.0_f64.dedup_key(), None);
    }

    #[test]
    fn test_string_reading() {
        let code = "7891234567895".to_string();
        assert_eq!(code.value(), None);
        assert_eq!(code.dedup_key().as_deref(), Some("7891234567895"));
    }
}
