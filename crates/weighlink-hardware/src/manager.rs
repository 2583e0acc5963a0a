//! Device registry and supervisor.
//!
//! This module provides the [`DeviceManager`], which owns every registered
//! device, drives it by id and relays its events to a [`NotificationSink`].
//!
//! # Architecture
//!
//! Each device runs two tasks: a supervision loop that owns the device (see
//! [`supervisor`](crate::supervisor)) and a relay that turns its events into
//! sink calls. The registry itself only keeps handles in a concurrent map, so
//! lookups, registrations and removals never wait on a device or on the sink.
//!
//! ```text
//!                          ┌────────────┐  events  ┌───────┐
//!  register_device() ────► │ supervisor │ ───────► │ relay │ ───► NotificationSink
//!                          └────────────┘          └───────┘
//!       DashMap<DeviceId, ManagedDevice> ◄── connect/start/stop(id)
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use weighlink_core::DeviceId;
//! use weighlink_hardware::config::ManagerConfig;
//! use weighlink_hardware::device::Device;
//! use weighlink_hardware::manager::DeviceManager;
//! use weighlink_hardware::mock::MockDriver;
//! use weighlink_hardware::notify::ChannelSink;
//!
//! #[tokio::main]
//! async fn main() -> weighlink_hardware::Result<()> {
//!     let (sink, mut notifications) = ChannelSink::new(64);
//!     let manager = DeviceManager::new(sink, ManagerConfig::default());
//!
//!     let (driver, _mock) = MockDriver::scale("Dock 1");
//!     let id = DeviceId::new("scale-1")?;
//!     manager.register_device(Device::new(id.clone(), driver))?;
//!
//!     manager.connect(&id).await?;
//!     manager.start(&id).await?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{notification:?}");
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::config::{DeviceDescriptor, ManagerConfig};
use crate::device::{Device, EventReceiver};
use crate::error::{HardwareError, Result};
use crate::events::DeviceEvent;
use crate::health::DeviceHealth;
use crate::notify::NotificationSink;
use crate::supervisor::{self, DeviceHandle};
use crate::traits::{DeviceDriver, Reading};
use crate::types::DeviceStatus;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::join_all;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weighlink_core::{DeviceId, DeviceType};

/// Registry entry for one device.
#[derive(Debug)]
struct ManagedDevice {
    handle: DeviceHandle,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    relay: JoinHandle<()>,
}

/// Registry of supervised devices.
///
/// Must be created and used inside a Tokio runtime. Dropping the manager
/// cancels every device; call [`shutdown`](Self::shutdown) to also wait for
/// them to close their links.
pub struct DeviceManager<S: NotificationSink> {
    devices: DashMap<DeviceId, ManagedDevice>,
    sink: Arc<S>,
    config: ManagerConfig,
    root: CancellationToken,
    shut_down: AtomicBool,
    /// Registration notices still being delivered.
    notices: Mutex<JoinSet<()>>,
}

impl<S: NotificationSink> DeviceManager<S> {
    pub fn new(sink: S, config: ManagerConfig) -> Self {
        Self {
            devices: DashMap::new(),
            sink: Arc::new(sink),
            config,
            root: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            notices: Mutex::new(JoinSet::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register a device and start supervising it.
    ///
    /// The device is initialized (`Uninitialized → Disconnected`) but not
    /// connected.
    ///
    /// # Errors
    ///
    /// - [`HardwareError::DuplicateIdentity`] if the id is taken; nothing is
    ///   changed.
    /// - [`HardwareError::ManagerShutDown`] after [`shutdown`](Self::shutdown).
    /// - [`HardwareError::Configuration`] if the device's event stream was
    ///   already taken.
    pub fn register_device<D: DeviceDriver>(&self, mut device: Device<D>) -> Result<DeviceHandle> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(HardwareError::ManagerShutDown);
        }

        let id = device.id().clone();
        let slot = match self.devices.entry(id.clone()) {
            Entry::Occupied(_) => return Err(HardwareError::DuplicateIdentity { id }),
            Entry::Vacant(slot) => slot,
        };

        let events = device.take_event_receiver().ok_or_else(|| {
            HardwareError::configuration(format!("{id}: event stream already taken"))
        })?;

        let device_type = device.metadata().device_type;
        let relay = tokio::spawn(relay(
            id.clone(),
            device_type,
            events,
            Arc::clone(&self.sink),
            self.config.notify_timeout,
        ));

        let cancel = self.root.child_token();
        let (handle, supervisor) = supervisor::spawn(device, &self.config, cancel.clone());

        slot.insert(ManagedDevice {
            handle: handle.clone(),
            cancel,
            supervisor,
            relay,
        });

        info!(device_id = %id, device_type = %device_type, "Device registered");
        self.spawn_list_changed();
        Ok(handle)
    }

    /// Build a device from `descriptor` around `driver` and register it.
    pub fn register_from_descriptor<D: DeviceDriver>(
        &self,
        descriptor: &DeviceDescriptor,
        driver: D,
    ) -> Result<DeviceHandle> {
        let device = descriptor.build_device(driver)?;
        self.register_device(device)
    }

    /// Stop and remove a device.
    ///
    /// Returns `false` (and notifies nobody) if the id is not registered.
    pub async fn unregister_device(&self, id: &DeviceId) -> bool {
        let Some((_, managed)) = self.devices.remove(id) else {
            debug!(device_id = %id, "Unregister ignored; device not registered");
            return false;
        };

        self.retire(id, managed).await;
        info!(device_id = %id, "Device unregistered");

        let timeout = self.config.notify_timeout;
        if let Err(e) = guarded(self.sink.notify_list_changed(), timeout).await {
            warn!(error = %e, "Failed to deliver list change");
        }
        true
    }

    /// Stop every device and release the registry.
    ///
    /// Idempotent. No notifications are sent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(devices = self.devices.len(), "Shutting down device manager");
        self.root.cancel();

        let mut notices = std::mem::take(&mut *self.lock_notices());
        notices.abort_all();
        while notices.join_next().await.is_some() {}

        let ids: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        let retiring = ids.into_iter().filter_map(|id| {
            self.devices
                .remove(&id)
                .map(|(id, managed)| async move { self.retire(&id, managed).await })
        });
        join_all(retiring).await;

        debug!("Device manager shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Control handle for one device.
    pub fn handle(&self, id: &DeviceId) -> Result<DeviceHandle> {
        self.devices
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| HardwareError::DeviceNotFound { id: id.clone() })
    }

    pub async fn connect(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.connect().await
    }

    pub async fn start(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.start().await
    }

    pub async fn pause(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.pause().await
    }

    pub async fn resume(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.resume().await
    }

    pub async fn stop(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.stop().await
    }

    pub async fn enter_demo(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.enter_demo().await
    }

    /// Reset the retry budget and connect again.
    pub async fn reconnect(&self, id: &DeviceId) -> Result<()> {
        self.handle(id)?.reconnect().await
    }

    pub fn status(&self, id: &DeviceId) -> Result<DeviceStatus> {
        Ok(self.handle(id)?.status())
    }

    pub fn health(&self, id: &DeviceId) -> Result<DeviceHealth> {
        Ok(self.handle(id)?.health())
    }

    /// Registered ids, sorted.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Status of every device, sorted by id.
    pub fn statuses(&self) -> Vec<(DeviceId, DeviceStatus)> {
        let mut statuses: Vec<_> = self
            .devices
            .iter()
            .map(|e| (e.key().clone(), e.handle.status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    /// Connect every device; failures do not stop the others.
    pub async fn connect_all(&self) -> Vec<(DeviceId, Result<()>)> {
        self.for_each_device(|handle| async move { handle.connect().await })
            .await
    }

    /// Start every device; failures do not stop the others.
    pub async fn start_all(&self) -> Vec<(DeviceId, Result<()>)> {
        self.for_each_device(|handle| async move { handle.start().await })
            .await
    }

    async fn for_each_device<F, Fut>(&self, op: F) -> Vec<(DeviceId, Result<()>)>
    where
        F: Fn(DeviceHandle) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // Clone handles out first; no map guard is held across an await.
        let mut handles: Vec<DeviceHandle> =
            self.devices.iter().map(|e| e.handle.clone()).collect();
        handles.sort_by(|a, b| a.id().cmp(b.id()));

        join_all(handles.into_iter().map(|handle| {
            let id = handle.id().clone();
            let fut = op(handle);
            async move { (id, fut.await) }
        }))
        .await
    }

    /// Unsubscribe, cancel and wait for the supervision loop.
    async fn retire(&self, id: &DeviceId, managed: ManagedDevice) {
        managed.relay.abort();
        managed.cancel.cancel();

        let mut supervisor = managed.supervisor;
        match time::timeout(self.config.shutdown_timeout, &mut supervisor).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => warn!(device_id = %id, "Supervisor panicked"),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(device_id = %id, "Supervisor did not stop in time; aborting");
                supervisor.abort();
            }
        }
    }

    fn spawn_list_changed(&self) {
        let sink = Arc::clone(&self.sink);
        let timeout = self.config.notify_timeout;
        let cancel = self.root.clone();

        let mut notices = self.lock_notices();
        while notices.try_join_next().is_some() {}
        notices.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = guarded(sink.notify_list_changed(), timeout) => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to deliver list change");
                    }
                }
            }
        });
    }

    fn lock_notices(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: NotificationSink> Drop for DeviceManager<S> {
    fn drop(&mut self) {
        self.root.cancel();
        self.lock_notices().abort_all();
        for entry in self.devices.iter() {
            entry.relay.abort();
        }
    }
}

impl<S: NotificationSink> std::fmt::Debug for DeviceManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.device_ids())
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Forward one device's events to the sink until the stream ends or the task
/// is aborted.
async fn relay<S, P>(
    id: DeviceId,
    device_type: DeviceType,
    mut events: EventReceiver<P>,
    sink: Arc<S>,
    timeout: Duration,
) where
    S: NotificationSink,
    P: Reading,
{
    while let Some(event) = events.recv().await {
        let kind = event_kind(&event);
        if let Err(e) = deliver(&*sink, &id, device_type, event, timeout).await {
            warn!(device_id = %id, event = kind, error = %e, "Notification delivery failed");
        }
    }
    debug!(device_id = %id, "Event relay finished");
}

async fn deliver<S, P>(
    sink: &S,
    id: &DeviceId,
    device_type: DeviceType,
    event: DeviceEvent<P>,
    timeout: Duration,
) -> Result<()>
where
    S: NotificationSink,
    P: Reading,
{
    let device_id = id.as_str();
    let device_type = device_type.as_str();

    match event {
        DeviceEvent::StatusChanged(e) => {
            guarded(
                sink.notify_status_update(
                    device_id,
                    device_type,
                    e.old_state.as_str(),
                    e.new_state.as_str(),
                ),
                timeout,
            )
            .await
        }
        DeviceEvent::ErrorOccurred(e) => {
            guarded(
                sink.notify_error(device_id, device_type, &e.message, e.severity.as_str()),
                timeout,
            )
            .await
        }
        DeviceEvent::DataReceived(e) => {
            let payload = serde_json::to_value(&e.payload).map_err(|err| {
                HardwareError::notification(format!("cannot serialize reading: {err}"))
            })?;
            guarded(
                sink.notify_data(
                    device_id,
                    device_type,
                    &payload,
                    e.sequence_number,
                    e.is_synthetic,
                ),
                timeout,
            )
            .await
        }
    }
}

/// Await one sink call, turning panics and overruns into errors.
async fn guarded<F>(call: F, timeout: Duration) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(HardwareError::notification("sink panicked")),
        Err(_) => Err(HardwareError::notification(format!(
            "sink did not answer within {}ms",
            timeout.as_millis()
        ))),
    }
}

fn event_kind<P>(event: &DeviceEvent<P>) -> &'static str {
    match event {
        DeviceEvent::StatusChanged(_) => "status",
        DeviceEvent::ErrorOccurred(_) => "error",
        DeviceEvent::DataReceived(_) => "data",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use crate::notify::{ChannelSink, Notification};
    use crate::state::DeviceState;
    use tokio::sync::mpsc;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    fn manager() -> (DeviceManager<ChannelSink>, mpsc::Receiver<Notification>) {
        let (sink, rx) = ChannelSink::new(256);
        (DeviceManager::new(sink, ManagerConfig::default()), rx)
    }

    fn scale(name: &str) -> Device<MockDriver<crate::mock::WeightReading>> {
        let (driver, _mock) = MockDriver::scale(name);
        Device::new(id(name), driver)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (manager, _rx) = manager();
        let handle = manager.register_device(scale("scale-1")).unwrap();

        assert_eq!(handle.state(), DeviceState::Disconnected);
        assert_eq!(manager.device_count(), 1);
        assert!(manager.contains(&id("scale-1")));
        assert_eq!(manager.device_ids(), vec![id("scale-1")]);
        assert_eq!(
            manager.status(&id("scale-1")).unwrap().state,
            DeviceState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let (manager, _rx) = manager();
        assert!(matches!(
            manager.connect(&id("nope")).await,
            Err(HardwareError::DeviceNotFound { .. })
        ));
        assert!(manager.health(&id("nope")).is_err());
        assert!(!manager.unregister_device(&id("nope")).await);
    }

    #[tokio::test]
    async fn test_register_after_shutdown() {
        let (manager, _rx) = manager();
        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.is_shut_down());
        assert!(matches!(
            manager.register_device(scale("scale-1")),
            Err(HardwareError::ManagerShutDown)
        ));
    }

    #[tokio::test]
    async fn test_taken_event_stream_is_rejected() {
        let (manager, _rx) = manager();
        let mut device = scale("scale-1");
        drop(device.take_event_receiver());

        assert!(matches!(
            manager.register_device(device),
            Err(HardwareError::Configuration { .. })
        ));
        assert_eq!(manager.device_count(), 0);
    }

    #[tokio::test]
    async fn test_bulk_operations_report_each_device() {
        let (manager, _rx) = manager();
        let (driver, mock) = MockDriver::scale("broken");
        mock.fail_next_connects(1);
        manager
            .register_device(
                Device::new(id("broken"), driver)
                    .with_reconnection_policy(crate::ReconnectionPolicy::disabled()),
            )
            .unwrap();
        manager.register_device(scale("scale-1")).unwrap();

        let results = manager.connect_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, id("broken"));
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());

        let started = manager.start_all().await;
        assert!(started[0].1.is_err());
        assert!(started[1].1.is_ok());
        assert_eq!(
            manager.status(&id("scale-1")).unwrap().state,
            DeviceState::Running
        );
    }

    #[tokio::test]
    async fn test_guarded_catches_panics_and_timeouts() {
        let panicking = async {
            if true {
                panic!("sink exploded");
            }
            Ok(())
        };
        assert!(guarded(panicking, Duration::from_secs(1)).await.is_err());

        let slow = async {
            time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };
        assert!(guarded(slow, Duration::from_millis(10)).await.is_err());

        assert!(guarded(async { Ok(()) }, Duration::from_secs(1)).await.is_ok());
    }
}
