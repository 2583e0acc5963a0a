//! Common test utilities for integration tests.
//!
//! The [`RecordingSink`] keeps every notification it receives and can be
//! switched into failure modes to check that a misbehaving sink never
//! affects the devices.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use weighlink_core::DeviceId;
use weighlink_hardware::config::ManagerConfig;
use weighlink_hardware::device::Device;
use weighlink_hardware::mock::{MockDriver, MockHandle, WeightReading};
use weighlink_hardware::notify::{Notification, NotificationSink};
use weighlink_hardware::{HardwareError, ReconnectionPolicy, Result};

/// How the sink answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkMode {
    Accept = 0,
    Fail = 1,
    Panic = 2,
    Hang = 3,
    /// Take 100ms before recording and accepting.
    Slow = 4,
}

#[derive(Default)]
struct Inner {
    log: Mutex<Vec<Notification>>,
    changed: Notify,
    mode: AtomicU8,
}

/// Sink that records notifications.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Inner>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: SinkMode) {
        self.inner.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn list_changes(&self) -> usize {
        self.notifications()
            .iter()
            .filter(|n| matches!(n, Notification::ListChanged))
            .count()
    }

    /// `(old, new)` pairs reported for `device_id`, in delivery order.
    pub fn transitions(&self, device_id: &str) -> Vec<(String, String)> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::StatusUpdate {
                    device_id: id,
                    old_state,
                    new_state,
                    ..
                } if id == device_id => Some((old_state, new_state)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self, device_id: &str) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| matches!(n, Notification::Error { device_id: id, .. } if id == device_id))
            .collect()
    }

    /// Wait until `condition` holds on the recorded notifications.
    ///
    /// Panics after 30 seconds (of possibly paused) time.
    pub async fn wait_until(&self, condition: impl Fn(&[Notification]) -> bool) {
        let wait = async {
            loop {
                let notified = self.inner.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if condition(&self.inner.log.lock().unwrap()) {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(Duration::from_secs(30), wait).await.is_err() {
            panic!("condition not met; recorded: {:#?}", self.notifications());
        }
    }

    /// Wait until `device_id` reported a transition into `state`.
    pub async fn wait_for_transition(&self, device_id: &str, state: &str) {
        self.wait_until(|log| {
            log.iter().any(|n| {
                matches!(n, Notification::StatusUpdate { device_id: id, new_state, .. }
                    if id == device_id && new_state == state)
            })
        })
        .await;
    }

    async fn record(&self, notification: Notification) -> Result<()> {
        if self.inner.mode.load(Ordering::SeqCst) == SinkMode::Slow as u8 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.inner.log.lock().unwrap().push(notification);
        self.inner.changed.notify_waiters();

        match self.inner.mode.load(Ordering::SeqCst) {
            1 => Err(HardwareError::notification("presentation tier offline")),
            2 => panic!("sink blew up"),
            3 => std::future::pending().await,
            _ => Ok(()),
        }
    }
}

impl NotificationSink for RecordingSink {
    async fn notify_status_update(
        &self,
        device_id: &str,
        device_type: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<()> {
        self.record(Notification::StatusUpdate {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            old_state: old_state.to_string(),
            new_state: new_state.to_string(),
        })
        .await
    }

    async fn notify_error(
        &self,
        device_id: &str,
        device_type: &str,
        message: &str,
        severity: &str,
    ) -> Result<()> {
        self.record(Notification::Error {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            message: message.to_string(),
            severity: severity.to_string(),
        })
        .await
    }

    async fn notify_list_changed(&self) -> Result<()> {
        self.record(Notification::ListChanged).await
    }

    async fn notify_data(
        &self,
        device_id: &str,
        device_type: &str,
        payload: &serde_json::Value,
        sequence_number: u64,
        is_synthetic: bool,
    ) -> Result<()> {
        self.record(Notification::Data {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            payload: payload.clone(),
            sequence_number,
            is_synthetic,
        })
        .await
    }
}

pub fn id(s: &str) -> DeviceId {
    DeviceId::new(s).unwrap()
}

/// Manager settings with short bounds for tests.
pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        notify_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(1),
        ..ManagerConfig::default()
    }
}

/// Mock scale polled every 50ms.
pub fn scale(
    name: &str,
    policy: ReconnectionPolicy,
) -> (Device<MockDriver<WeightReading>>, MockHandle<WeightReading>) {
    let (driver, mock) = MockDriver::scale(name);
    let device = Device::new(id(name), driver)
        .with_polling_interval(Duration::from_millis(50))
        .with_reconnection_policy(policy);
    (device, mock)
}

/// Retry every 100ms, doubling up to 1s.
pub fn fast_retries(max_retries: Option<u32>) -> ReconnectionPolicy {
    ReconnectionPolicy {
        max_retries,
        retry_interval: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        ..ReconnectionPolicy::default()
    }
}
