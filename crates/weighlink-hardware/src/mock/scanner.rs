//! Mock barcode scanner.

use super::driver::{MockDriver, MockHandle};
use crate::traits::Reading;
use crate::types::DeviceMetadata;
use serde::{Deserialize, Serialize};
use weighlink_core::{DeviceType, ProtocolType};

const DEMO_CODES: [&str; 4] = [
    "7891234567895",
    "7891234567895",
    "4006381333931",
    "5901234123457",
];

/// A decoded barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeReading {
    pub code: String,
    pub symbology: String,
}

impl BarcodeReading {
    pub fn ean13(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            symbology: "EAN-13".to_string(),
        }
    }
}

impl Reading for BarcodeReading {
    fn value(&self) -> Option<f64> {
        None
    }

    fn dedup_key(&self) -> Option<String> {
        Some(self.code.clone())
    }
}

impl MockDriver<BarcodeReading> {
    /// Mock gate scanner; its demo source repeats a short list of codes.
    pub fn scanner(name: impl Into<String>) -> (Self, MockHandle<BarcodeReading>) {
        let metadata = DeviceMetadata::new(DeviceType::Scanner, name, ProtocolType::Simulated)
            .with_manufacturer("Weighlink")
            .with_model("MOCK-SCAN")
            .with_capability("ean13");

        let (driver, handle) = Self::new(metadata);
        let driver = driver.with_simulator(|tick| {
            BarcodeReading::ean13(DEMO_CODES[(tick % DEMO_CODES.len() as u64) as usize])
        });
        (driver, handle)
    }
}
