//! Reconnection policy and scheduler.
//!
//! After a connection loss the supervisor asks the [`ReconnectScheduler`] how
//! long to wait before the next attempt. Delays follow a capped exponential
//! backoff:
//!
//! ```text
//! delay(n) = min(retry_interval × 2^(n-1), max_backoff)     n = 1, 2, 3, ...
//! ```
//!
//! or a constant `retry_interval` when backoff is disabled. There is no
//! jitter: delays are non-decreasing across consecutive failures, which keeps
//! them predictable for operators reading the logs.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use weighlink_hardware::reconnect::{ReconnectionPolicy, ReconnectScheduler, RetryDecision};
//!
//! let policy = ReconnectionPolicy {
//!     max_retries: Some(2),
//!     retry_interval: Duration::from_secs(1),
//!     ..ReconnectionPolicy::default()
//! };
//! let mut scheduler = ReconnectScheduler::new(policy);
//!
//! assert_eq!(
//!     scheduler.next_attempt(),
//!     RetryDecision::Retry { attempt: 1, delay: Duration::from_secs(1) }
//! );
//! assert_eq!(
//!     scheduler.next_attempt(),
//!     RetryDecision::Retry { attempt: 2, delay: Duration::from_secs(2) }
//! );
//! assert_eq!(scheduler.next_attempt(), RetryDecision::Exhausted { attempts: 2 });
//! ```

use crate::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use weighlink_core::constants::{
    DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL_MS,
};

/// Retry settings for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// When false, connection losses are not retried.
    pub enabled: bool,

    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_retries: Option<u32>,

    /// Delay before the first attempt.
    #[serde(rename = "retry_interval_ms", with = "duration_ms")]
    pub retry_interval: Duration,

    /// Double the delay after each failure.
    pub exponential_backoff: bool,

    /// Upper bound for backoff delays.
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: Some(DEFAULT_MAX_RETRIES),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            exponential_backoff: true,
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl ReconnectionPolicy {
    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.retry_interval;
        }

        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.retry_interval
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff)
    }
}

/// Outcome of asking the scheduler for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { attempt: u32, delay: Duration },

    /// The retry budget is spent.
    Exhausted { attempts: u32 },

    /// The policy does not retry at all.
    Disabled,
}

/// Tracks consecutive failed attempts for one device.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    policy: ReconnectionPolicy,
    attempts: u32,
}

impl ReconnectScheduler {
    /// Create a scheduler with no attempts made.
    pub fn new(policy: ReconnectionPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Register a failure and decide what happens next.
    pub fn next_attempt(&mut self) -> RetryDecision {
        if !self.policy.enabled {
            return RetryDecision::Disabled;
        }

        if let Some(max) = self.policy.max_retries
            && self.attempts >= max
        {
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for_attempt(self.attempts),
        }
    }

    /// Forget past failures (after a successful connect or a manual reconnect).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.policy.enabled && self.policy.max_retries.is_some_and(|max| self.attempts >= max)
    }

    /// The policy this scheduler applies.
    pub fn policy(&self) -> &ReconnectionPolicy {
        &self.policy
    }
}
