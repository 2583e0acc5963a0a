//! Device management and hardware abstraction layer for Weighlink.
//!
//! This crate supervises the field devices of a weighing station (truck
//! scales, barcode scanners, environmental sensors) behind one uniform
//! lifecycle. Protocol-specific drivers only implement [`DeviceDriver`]; the
//! crate adds the state machine, reconnection with backoff, data filtering,
//! health scoring and event delivery on top.
//!
//! # Design Philosophy
//!
//! - **Async-first**: drivers expose native async methods (Rust 1.90 +
//!   Edition 2024 RPITIT) whose futures are `Send`, so each device can live in
//!   its own Tokio task.
//! - **Typed payloads**: every driver declares its reading type; events carry
//!   it without downcasting.
//! - **Message passing**: devices report through channels, never through
//!   callbacks into the registry.
//! - **Error-aware**: all operations return [`Result<T>`] with a
//!   [`HardwareError`] that tells the supervisor whether to retry.
//!
//! # Layers
//!
//! ```text
//!   DeviceManager ── register / connect / start / stop (by id)
//!        │
//!        ├── supervisor task per device ── Device<D> ── DeviceDriver (D)
//!        │        │                          ├── DataFilter
//!        │        │                          ├── HealthMonitor
//!        │        │                          └── DeviceState machine
//!        │        └── ReconnectScheduler
//!        │
//!        └── relay task per device ──► NotificationSink
//! ```
//!
//! # Writing a Driver
//!
//! ```no_run
//! use weighlink_core::{DeviceType, ProtocolType};
//! use weighlink_hardware::{DeviceDriver, DeviceMetadata, HardwareError, Result};
//!
//! struct SerialScale {
//!     metadata: DeviceMetadata,
//!     port_open: bool,
//! }
//!
//! impl DeviceDriver for SerialScale {
//!     type Payload = f64;
//!
//!     fn metadata(&self) -> &DeviceMetadata {
//!         &self.metadata
//!     }
//!
//!     async fn open(&mut self) -> Result<()> {
//!         self.port_open = true;
//!         Ok(())
//!     }
//!
//!     async fn close(&mut self) -> Result<()> {
//!         self.port_open = false;
//!         Ok(())
//!     }
//!
//!     async fn read(&mut self) -> Result<Option<f64>> {
//!         if !self.port_open {
//!             return Err(HardwareError::disconnected("COM3"));
//!         }
//!         Ok(Some(12_480.0))
//!     }
//! }
//! ```
//!
//! # Mock Implementations
//!
//! The [`mock`] module provides scriptable drivers for development and
//! testing without physical hardware.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod health;
pub mod manager;
pub mod mock;
pub mod notify;
pub mod reconnect;
pub mod state;
pub mod supervisor;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{DescriptorSet, DeviceDescriptor, ManagerConfig, ProtocolSettings};
pub use device::{Device, PollOutcome};
pub use error::{HardwareError, Result};
pub use events::{DataReceived, DeviceEvent, ErrorOccurred, ErrorSeverity, StatusChanged};
pub use filter::{DataFilter, DataFilterConfig};
pub use health::{DeviceHealth, HealthConfig, HealthMonitor, HealthStatus};
pub use manager::DeviceManager;
pub use notify::{ChannelSink, Notification, NotificationSink};
pub use reconnect::{ReconnectScheduler, ReconnectionPolicy, RetryDecision};
pub use state::DeviceState;
pub use supervisor::DeviceHandle;
pub use traits::{DeviceDriver, Reading};
pub use types::{DeviceMetadata, DeviceStatus};
