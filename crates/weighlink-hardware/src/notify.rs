//! Notification sink boundary.
//!
//! The registry reports lifecycle changes, errors and registry membership
//! changes to a [`NotificationSink`]. Device identity, type, states and
//! severities are passed as their stable string names so that a presentation
//! tier does not need to link against this crate's types.
//!
//! Delivery is fire-and-forget from the device's point of view: the relay
//! logs failures and moves on.

use crate::error::{HardwareError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

/// Consumer of device notifications.
pub trait NotificationSink: Send + Sync + 'static {
    /// A device committed a state transition.
    fn notify_status_update(
        &self,
        device_id: &str,
        device_type: &str,
        old_state: &str,
        new_state: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// A device observed an error.
    fn notify_error(
        &self,
        device_id: &str,
        device_type: &str,
        message: &str,
        severity: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// A device was registered or unregistered.
    fn notify_list_changed(&self) -> impl Future<Output = Result<()>> + Send;

    /// A reading passed the data filter.
    ///
    /// Sinks that only track lifecycle can leave this as is.
    fn notify_data(
        &self,
        device_id: &str,
        device_type: &str,
        payload: &serde_json::Value,
        sequence_number: u64,
        is_synthetic: bool,
    ) -> impl Future<Output = Result<()>> + Send {
        let _ = (device_id, device_type, payload, sequence_number, is_synthetic);
        async { Ok(()) }
    }
}

/// A notification as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    StatusUpdate {
        device_id: String,
        device_type: String,
        old_state: String,
        new_state: String,
    },
    Error {
        device_id: String,
        device_type: String,
        message: String,
        severity: String,
    },
    ListChanged,
    Data {
        device_id: String,
        device_type: String,
        payload: serde_json::Value,
        sequence_number: u64,
        is_synthetic: bool,
    },
}

impl Notification {
    /// Device the notification is about, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Notification::StatusUpdate { device_id, .. }
            | Notification::Error { device_id, .. }
            | Notification::Data { device_id, .. } => Some(device_id),
            Notification::ListChanged => None,
        }
    }
}

/// Sink that forwards [`Notification`] values into a bounded channel.
///
/// Delivery never waits: a full channel fails the delivery, which the relay
/// logs.
///
/// # Examples
///
/// ```
/// use weighlink_hardware::notify::{ChannelSink, Notification, NotificationSink};
///
/// #[tokio::main]
/// async fn main() -> weighlink_hardware::Result<()> {
///     let (sink, mut rx) = ChannelSink::new(16);
///     sink.notify_list_changed().await?;
///
///     assert_eq!(rx.recv().await, Some(Notification::ListChanged));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn deliver(&self, notification: Notification) -> Result<()> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                HardwareError::notification("notification channel is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                HardwareError::notification("notification receiver dropped")
            }
        })
    }
}

impl NotificationSink for ChannelSink {
    async fn notify_status_update(
        &self,
        device_id: &str,
        device_type: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<()> {
        self.deliver(Notification::StatusUpdate {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            old_state: old_state.to_string(),
            new_state: new_state.to_string(),
        })
    }

    async fn notify_error(
        &self,
        device_id: &str,
        device_type: &str,
        message: &str,
        severity: &str,
    ) -> Result<()> {
        self.deliver(Notification::Error {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            message: message.to_string(),
            severity: severity.to_string(),
        })
    }

    async fn notify_list_changed(&self) -> Result<()> {
        self.deliver(Notification::ListChanged)
    }

    async fn notify_data(
        &self,
        device_id: &str,
        device_type: &str,
        payload: &serde_json::Value,
        sequence_number: u64,
        is_synthetic: bool,
    ) -> Result<()> {
        self.deliver(Notification::Data {
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
            payload: payload.clone(),
            sequence_number,
            is_synthetic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LifecycleOnly;

    impl NotificationSink for LifecycleOnly {
        async fn notify_status_update(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn notify_error(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn notify_list_changed(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notify_data_defaults_to_noop() {
        let sink = LifecycleOnly;
        let payload = serde_json::json!({ "weight": 10.0 });
        assert!(sink.notify_data("s", "Scale", &payload, 1, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new(8);
        sink.notify_status_update("scale-1", "Scale", "Connecting", "Connected")
            .await
            .unwrap();
        sink.notify_error("scale-1", "Scale", "boom", "Error").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::StatusUpdate {
                device_id: "scale-1".into(),
                device_type: "Scale".into(),
                old_state: "Connecting".into(),
                new_state: "Connected".into(),
            }
        );
        let error = rx.recv().await.unwrap();
        assert_eq!(error.device_id(), Some("scale-1"));
    }

    #[tokio::test]
    async fn test_channel_sink_full() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.notify_list_changed().await.unwrap();

        let err = sink.notify_list_changed().await.unwrap_err();
        assert!(matches!(err, HardwareError::NotificationDelivery { .. }));
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        assert!(sink.notify_list_changed().await.is_err());
    }

    #[test]
    fn test_notification_json_shape() {
        let json = serde_json::to_value(Notification::ListChanged).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "list_changed" }));
    }
}
