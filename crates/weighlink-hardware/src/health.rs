//! Device health scoring.
//!
//! The [`HealthMonitor`] keeps a rolling window of poll outcomes and derives a
//! [`DeviceHealth`] snapshot from three signals:
//!
//! - **error rate**: failed polls / polls in the window;
//! - **heartbeat recency**: time since the device last answered;
//! - **response time**: latency of the most recent successful poll.
//!
//! # Score
//!
//! ```text
//! score = 100 − 60 × error_rate − 40 × staleness
//! ```
//!
//! where `staleness` grows linearly from 0 (heartbeat within one expected
//! interval) to 1 (heartbeat `missed_heartbeats` intervals old, or never
//! seen). The score is clamped to `[0, 100]`, so a higher error rate or an
//! older heartbeat always lowers it until it reaches the floor.
//!
//! Heartbeat age only grows while the device is expected to answer. A device
//! that is paused or merely connected is not polled, so
//! [`HealthMonitor::set_polling`] freezes the age until polling resumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use weighlink_core::constants::{
    DEFAULT_DEGRADED_ERROR_RATE, DEFAULT_HEALTH_WINDOW, DEFAULT_MISSED_HEARTBEATS,
    DEFAULT_POLLING_INTERVAL_MS, DEFAULT_UNHEALTHY_ERROR_RATE,
};

const ERROR_RATE_WEIGHT: f64 = 60.0;
const STALENESS_WEIGHT: f64 = 40.0;

/// Health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Result of one named health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &str, passed: bool, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail,
        }
    }
}

/// Complete health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub status: HealthStatus,
    /// 0 to 100, higher is better.
    pub score: f64,
    /// Latency of the most recent successful poll.
    pub response_time: Option<Duration>,
    /// Forwarded readings per second.
    pub data_rate: f64,
    /// Failed polls / polls in the window.
    pub error_rate: f64,
    pub checks: Vec<HealthCheck>,
    pub recommendations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl DeviceHealth {
    /// Snapshot for a device nobody has observed yet.
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            score: 0.0,
            response_time: None,
            data_rate: 0.0,
            error_rate: 0.0,
            checks: Vec::new(),
            recommendations: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }

    /// Look up a check by name.
    pub fn check(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Thresholds and window sizes for health evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    /// Time between two expected heartbeats (the polling interval).
    pub expected_interval: Duration,

    /// Poll outcomes kept for the error rate.
    pub window_size: usize,

    /// Window over which the data rate is measured.
    pub rate_window: Duration,

    /// Error rate at or above which the device is no longer healthy.
    pub degraded_error_rate: f64,

    /// Error rate at or above which the device is unhealthy.
    pub unhealthy_error_rate: f64,

    /// Expected intervals without heartbeat before the device is unhealthy.
    pub missed_heartbeats: u32,

    /// Poll latency above which the response-time check fails.
    pub slow_response: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            expected_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            window_size: DEFAULT_HEALTH_WINDOW,
            rate_window: Duration::from_secs(10),
            degraded_error_rate: DEFAULT_DEGRADED_ERROR_RATE,
            unhealthy_error_rate: DEFAULT_UNHEALTHY_ERROR_RATE,
            missed_heartbeats: DEFAULT_MISSED_HEARTBEATS,
            slow_response: Duration::from_secs(1),
        }
    }
}

impl HealthConfig {
    /// Default thresholds for a device polled every `interval`.
    pub fn for_polling_interval(interval: Duration) -> Self {
        Self {
            expected_interval: interval,
            ..Self::default()
        }
    }
}

/// Rolling observation window for one device.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    /// `true` marks a failed poll.
    outcomes: VecDeque<bool>,
    forwarded: VecDeque<Instant>,
    last_heartbeat: Option<Instant>,
    last_response_time: Option<Duration>,
    /// Set while the device is not polled; heartbeat age is frozen here.
    idle_since: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            config,
            outcomes: VecDeque::with_capacity(capacity),
            forwarded: VecDeque::new(),
            last_heartbeat: None,
            last_response_time: None,
            idle_since: None,
        }
    }

    /// Tell the monitor whether the device is currently polled.
    ///
    /// While not polled the heartbeat age stops growing. On resume the age
    /// carries on from where it was frozen, or starts fresh if the device
    /// answered in between (a successful connect, for instance).
    pub fn set_polling(&mut self, polling: bool, now: Instant) {
        match (polling, self.idle_since) {
            (false, None) => self.idle_since = Some(now),
            (true, Some(since)) => {
                self.idle_since = None;
                if let Some(at) = self.last_heartbeat.as_mut() {
                    if *at >= since {
                        *at = now;
                    } else {
                        *at += now.saturating_duration_since(since);
                    }
                }
            }
            _ => {}
        }
    }

    /// Whether heartbeat age is currently frozen.
    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    /// The device answered; `latency` is the round-trip of the poll.
    pub fn record_success(&mut self, now: Instant, latency: Duration) {
        self.push_outcome(false);
        self.last_heartbeat = Some(now);
        self.last_response_time = Some(latency);
    }

    /// A poll or connection attempt failed.
    pub fn record_error(&mut self) {
        self.push_outcome(true);
    }

    /// A reading passed the filter.
    pub fn record_forwarded(&mut self, now: Instant) {
        self.forwarded.push_back(now);
        self.prune_forwarded(now);
    }

    /// Whether anything has been observed yet.
    pub fn has_observations(&self) -> bool {
        !self.outcomes.is_empty() || self.last_heartbeat.is_some()
    }

    /// Current error rate over the window.
    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let errors = self.outcomes.iter().filter(|failed| **failed).count();
        errors as f64 / self.outcomes.len() as f64
    }

    /// Produce a fresh snapshot as of `now`.
    pub fn evaluate(&mut self, now: Instant) -> DeviceHealth {
        if !self.has_observations() {
            return DeviceHealth::unknown();
        }

        self.prune_forwarded(now);

        let expected = self.config.expected_interval.max(Duration::from_millis(1));
        let missed = self.config.missed_heartbeats.max(2);
        let error_rate = self.error_rate();
        let reference = self.idle_since.map_or(now, |since| since.min(now));
        let heartbeat_age = self
            .last_heartbeat
            .map(|at| reference.saturating_duration_since(at));

        let staleness = staleness(heartbeat_age, expected, missed);
        let score = (100.0 - ERROR_RATE_WEIGHT * error_rate - STALENESS_WEIGHT * staleness)
            .clamp(0.0, 100.0);

        let heartbeat_fresh = heartbeat_age.is_some_and(|age| age <= expected);
        let heartbeat_absent = heartbeat_age.is_none_or(|age| age > expected * missed);

        let status = if error_rate >= self.config.unhealthy_error_rate || heartbeat_absent {
            HealthStatus::Unhealthy
        } else if error_rate < self.config.degraded_error_rate && heartbeat_fresh {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        let mut checks = Vec::with_capacity(3);
        let mut recommendations = Vec::new();

        let heartbeat_detail = match heartbeat_age {
            Some(age) => format!("last heartbeat {}ms ago", age.as_millis()),
            None => "no heartbeat observed".to_string(),
        };
        if !heartbeat_fresh {
            recommendations.push(format!(
                "Heartbeat is stale ({heartbeat_detail}); check cabling, power and the polling loop"
            ));
        }
        checks.push(HealthCheck::new("heartbeat", heartbeat_fresh, heartbeat_detail));

        let error_ok = error_rate < self.config.degraded_error_rate;
        if !error_ok {
            recommendations.push(format!(
                "Error rate is elevated ({:.1}%); inspect driver logs and line quality",
                error_rate * 100.0
            ));
        }
        checks.push(HealthCheck::new(
            "error_rate",
            error_ok,
            format!(
                "{:.1}% of {} recent polls failed",
                error_rate * 100.0,
                self.outcomes.len()
            ),
        ));

        let response_ok = self
            .last_response_time
            .is_none_or(|latency| latency <= self.config.slow_response);
        let response_detail = match self.last_response_time {
            Some(latency) => format!("last response in {}ms", latency.as_millis()),
            None => "no response measured".to_string(),
        };
        if !response_ok {
            recommendations.push(format!(
                "Device responds slowly ({response_detail}); consider a longer polling interval"
            ));
        }
        checks.push(HealthCheck::new("response_time", response_ok, response_detail));

        DeviceHealth {
            status,
            score,
            response_time: self.last_response_time,
            data_rate: self.forwarded.len() as f64 / self.config.rate_window.as_secs_f64().max(1e-3),
            error_rate,
            checks,
            recommendations,
            evaluated_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn push_outcome(&mut self, failed: bool) {
        if self.outcomes.len() >= self.config.window_size.max(1) {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(failed);
    }

    fn prune_forwarded(&mut self, now: Instant) {
        while let Some(front) = self.forwarded.front() {
            if now.saturating_duration_since(*front) > self.config.rate_window {
                self.forwarded.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 0 when the heartbeat is fresh, 1 when it is absent.
fn staleness(age: Option<Duration>, expected: Duration, missed: u32) -> f64 {
    let Some(age) = age else {
        return 1.0;
    };
    if age <= expected {
        return 0.0;
    }
    let span = expected.as_secs_f64() * f64::from(missed - 1);
    ((age - expected).as_secs_f64() / span).min(1.0)
}
