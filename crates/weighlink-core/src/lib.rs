//! Shared vocabulary for the Weighlink device supervision layer.
//!
//! This crate holds the small set of types every other Weighlink crate agrees
//! on: the validated [`DeviceId`] key, the [`DeviceType`] and [`ProtocolType`]
//! classifications, and the default timing constants used when a device
//! descriptor leaves a value unset.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
