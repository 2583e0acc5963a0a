//! Mock device implementations for testing and development.
//!
//! This module provides simulated drivers that can be controlled
//! programmatically without requiring physical hardware.

pub mod driver;
pub mod scale;
pub mod scanner;

// Re-export commonly used types
pub use driver::{MockDriver, MockHandle};
pub use scale::WeightReading;
pub use scanner::BarcodeReading;
