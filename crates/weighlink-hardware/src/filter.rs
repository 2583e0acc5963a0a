//! Per-device data filter.
//!
//! The filter sits between a driver and the device's event stream and drops
//! readings that carry no new information: a reading is suppressed only when
//! it is both *close* to the last forwarded one and *too soon* after it.
//!
//! ```text
//! suppress  ⇔  |value − last| < min_change_threshold
//!           ∧  elapsed(last)  < min_interval
//! ```
//!
//! Forwarded readings are numbered with a per-device sequence that starts at 1
//! and never repeats, whatever was suppressed in between.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use weighlink_hardware::filter::{DataFilter, DataFilterConfig};
//!
//! let mut filter = DataFilter::new(DataFilterConfig {
//!     enabled: true,
//!     min_change_threshold: 5.0,
//!     min_interval: Duration::from_millis(1000),
//! });
//!
//! let t0 = Instant::now();
//! assert_eq!(filter.admit(&100.0, t0), Some(1));
//! assert_eq!(filter.admit(&102.0, t0 + Duration::from_millis(200)), None);
//! assert_eq!(filter.admit(&101.0, t0 + Duration::from_millis(1500)), Some(2));
//! ```

use crate::config::duration_ms;
use crate::traits::Reading;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use weighlink_core::constants::{DEFAULT_MIN_CHANGE_THRESHOLD, DEFAULT_MIN_INTERVAL_MS};

/// Filter settings for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFilterConfig {
    /// When false every reading is forwarded.
    pub enabled: bool,

    /// Minimum absolute change that forwards a reading early.
    pub min_change_threshold: f64,

    /// Minimum time between forwarded readings that did not change enough.
    #[serde(rename = "min_interval_ms", with = "duration_ms")]
    pub min_interval: Duration,
}

impl Default for DataFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_change_threshold: DEFAULT_MIN_CHANGE_THRESHOLD,
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
        }
    }
}

/// What the last forwarded reading looked like.
#[derive(Debug, Clone, PartialEq)]
enum Reference {
    Numeric(f64),
    Keyed(String),
    Opaque,
}

#[derive(Debug, Clone)]
struct LastForwarded {
    reference: Reference,
    at: Instant,
}

/// Stateful filter for one device.
#[derive(Debug, Clone)]
pub struct DataFilter {
    config: DataFilterConfig,
    last: Option<LastForwarded>,
    sequence: u64,
    suppressed: u64,
}

impl DataFilter {
    /// Create a filter with the given settings.
    pub fn new(config: DataFilterConfig) -> Self {
        Self {
            config,
            last: None,
            sequence: 0,
            suppressed: 0,
        }
    }

    /// Decide whether `reading`, observed at `now`, should be forwarded.
    ///
    /// Returns the sequence number assigned to the reading, or `None` when it
    /// is suppressed.
    pub fn admit<R: Reading>(&mut self, reading: &R, now: Instant) -> Option<u64> {
        let reference = match (reading.value(), reading.dedup_key()) {
            (Some(value), _) => Reference::Numeric(value),
            (None, Some(key)) => Reference::Keyed(key),
            (None, None) => Reference::Opaque,
        };

        if self.config.enabled
            && let Some(last) = &self.last
        {
            let too_soon = now.saturating_duration_since(last.at) < self.config.min_interval;
            let unchanged = match (&reference, &last.reference) {
                (Reference::Numeric(value), Reference::Numeric(previous)) => {
                    (value - previous).abs() < self.config.min_change_threshold
                }
                (Reference::Keyed(key), Reference::Keyed(previous)) => key == previous,
                _ => false,
            };

            if too_soon && unchanged {
                self.suppressed += 1;
                return None;
            }
        }

        self.last = Some(LastForwarded { reference, at: now });
        self.sequence += 1;
        Some(self.sequence)
    }

    /// Forget the last forwarded reading so the next one is always forwarded.
    ///
    /// The sequence counter is kept.
    pub fn reset_reference(&mut self) {
        self.last = None;
    }

    /// Sequence number of the most recently forwarded reading (0 if none).
    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of readings suppressed so far.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    /// Current settings.
    pub fn config(&self) -> &DataFilterConfig {
        &self.config
    }
}
