//! Mock weighing scale.

use super::driver::{MockDriver, MockHandle};
use crate::traits::Reading;
use crate::types::DeviceMetadata;
use serde::{Deserialize, Serialize};
use weighlink_core::{DeviceType, ProtocolType};

/// Gross weight reported by a scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    pub weight: f64,
    pub unit: String,
    /// The load has settled.
    pub stable: bool,
}

impl WeightReading {
    /// A settled reading in kilograms.
    pub fn stable(weight: f64) -> Self {
        Self {
            weight,
            unit: "kg".to_string(),
            stable: true,
        }
    }

    /// A reading taken while the load is still moving.
    pub fn in_motion(weight: f64) -> Self {
        Self {
            stable: false,
            ..Self::stable(weight)
        }
    }
}

impl Reading for WeightReading {
    fn value(&self) -> Option<f64> {
        Some(self.weight)
    }
}

impl MockDriver<WeightReading> {
    /// Mock truck scale whose demo source drifts around 12.5 t.
    pub fn scale(name: impl Into<String>) -> (Self, MockHandle<WeightReading>) {
        let metadata = DeviceMetadata::new(DeviceType::Scale, name, ProtocolType::Simulated)
            .with_manufacturer("Weighlink")
            .with_model("MOCK-SCALE")
            .with_capability("continuous")
            .with_property("unit", "kg");

        let (driver, handle) = Self::new(metadata);
        (driver.with_simulator(demo_weight), handle)
    }
}

/// Saw-tooth drift of ±10 kg, in motion at the turning points.
fn demo_weight(tick: u64) -> WeightReading {
    let phase = (tick % 20) as f64;
    let weight = 12_500.0 + (phase - 10.0).abs() - 5.0;

    if tick % 10 == 0 {
        WeightReading::in_motion(weight)
    } else {
        WeightReading::stable(weight)
    }
}
