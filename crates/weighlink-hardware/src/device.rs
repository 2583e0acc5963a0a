//! Lifecycle wrapper around a driver.
//!
//! [`Device`] owns one [`DeviceDriver`] together with everything the driver
//! should not have to care about: the state machine, the data filter, the
//! health monitor and the outbound event stream.
//!
//! ```text
//!                ┌────────────────────────────── Device<D> ──┐
//!  connect() ──► │ state ─► driver.open()                    │
//!  poll()    ──► │ driver.read() ─► filter ─► health         │──► DeviceEvent<D::Payload>
//!  stop()    ──► │ driver.close() ─► state                   │
//!                └───────────────────────────────────────────┘
//! ```
//!
//! Every committed transition emits exactly one
//! [`StatusChanged`](crate::events::StatusChanged), sent after the new state is
//! stored, so a subscriber always observes `old_state` equal to the previous
//! `new_state`.

use crate::error::{HardwareError, Result};
use crate::events::{DataReceived, DeviceEvent, ErrorOccurred, ErrorSeverity, StatusChanged};
use crate::filter::{DataFilter, DataFilterConfig};
use crate::health::{DeviceHealth, HealthConfig, HealthMonitor};
use crate::reconnect::ReconnectionPolicy;
use crate::state::DeviceState;
use crate::traits::DeviceDriver;
use crate::types::{DeviceMetadata, DeviceStatus};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use weighlink_core::DeviceId;
use weighlink_core::constants::{DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_POLLING_INTERVAL_MS};

/// Receiving half of a device's event stream.
pub type EventReceiver<P> = mpsc::UnboundedReceiver<DeviceEvent<P>>;

/// What a single polling tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The device is not in a polling state.
    Idle,
    /// The device answered without a new reading.
    NoData,
    /// A reading passed the filter with this sequence number.
    Forwarded(u64),
    /// A reading was dropped by the filter.
    Suppressed,
    /// The sample was malformed; the device keeps running.
    ProtocolError,
    /// The link dropped; the device is now in `Error`.
    ConnectionLost,
    /// The driver gave up; the device is now in `Error`.
    Fatal,
}

/// A supervised device.
pub struct Device<D: DeviceDriver> {
    id: DeviceId,
    metadata: DeviceMetadata,
    driver: D,
    status: DeviceStatus,
    filter: DataFilter,
    health: HealthMonitor,
    polling_interval: Duration,
    connection_timeout: Duration,
    reconnection: ReconnectionPolicy,
    events_tx: mpsc::UnboundedSender<DeviceEvent<D::Payload>>,
    events_rx: Option<EventReceiver<D::Payload>>,
}

impl<D: DeviceDriver> std::fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("state", &self.status.state)
            .finish_non_exhaustive()
    }
}

impl<D: DeviceDriver> Device<D> {
    /// Wrap `driver`, taking the metadata the driver reports.
    pub fn new(id: DeviceId, driver: D) -> Self {
        let metadata = driver.metadata().clone();
        Self::with_metadata(id, metadata, driver)
    }

    /// Wrap `driver` with explicit metadata.
    pub fn with_metadata(id: DeviceId, metadata: DeviceMetadata, driver: D) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let polling_interval = Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS);

        Self {
            id,
            metadata,
            driver,
            status: DeviceStatus::new(),
            filter: DataFilter::new(DataFilterConfig::default()),
            health: HealthMonitor::new(HealthConfig::for_polling_interval(polling_interval)),
            polling_interval,
            connection_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            reconnection: ReconnectionPolicy::default(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn with_filter(mut self, config: DataFilterConfig) -> Self {
        self.filter = DataFilter::new(config);
        self
    }

    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health = HealthMonitor::new(config);
        self
    }

    /// Set the polling interval; the health monitor expects one heartbeat
    /// per interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self.health = HealthMonitor::new(HealthConfig {
            expected_interval: interval,
            ..self.health.config().clone()
        });
        self
    }

    /// Bound for `open` and for each `read`.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_reconnection_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    pub fn state(&self) -> DeviceState {
        self.status.state
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Evaluate health as of now.
    pub fn health(&mut self) -> DeviceHealth {
        self.health.evaluate(Instant::now())
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn reconnection_policy(&self) -> &ReconnectionPolicy {
        &self.reconnection
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Take the event stream. Returns `None` once taken.
    pub fn take_event_receiver(&mut self) -> Option<EventReceiver<D::Payload>> {
        self.events_rx.take()
    }

    /// Move a freshly constructed device to `Disconnected`.
    ///
    /// Does nothing if the device was already initialized.
    pub fn initialize(&mut self) {
        if self.state() == DeviceState::Uninitialized {
            self.transition(DeviceState::Disconnected, "Ready");
        }
    }

    /// Open the link.
    ///
    /// Valid from `Uninitialized`, `Disconnected` and `Error`. On failure the
    /// device moves to `Error`, emits an `ErrorOccurred` and the error is
    /// returned.
    pub async fn connect(&mut self) -> Result<()> {
        self.initialize();
        self.ensure("connect", DeviceState::Connecting)?;

        let description = format!("Connecting to {}", self.metadata.name);
        self.transition(DeviceState::Connecting, description);

        let started = Instant::now();
        let result = match time::timeout(self.connection_timeout, self.driver.open()).await {
            Ok(result) => result,
            Err(_) => Err(HardwareError::timeout(millis(self.connection_timeout))),
        };

        match result {
            Ok(()) => {
                let now = Instant::now();
                self.health.record_success(now, now - started);
                self.filter.reset_reference();
                self.status.connected_at = Some(Utc::now());
                self.transition(DeviceState::Connected, "Connected");
                info!(device_id = %self.id, "Device connected");
                Ok(())
            }
            Err(e) => {
                warn!(device_id = %self.id, error = %e, "Connection failed");
                self.health.record_error();
                self.status.record_error(e.to_string());
                self.transition(DeviceState::Error, format!("Connection failed: {e}"));
                self.emit_error(e.to_string(), ErrorSeverity::Error, e.is_recoverable());
                Err(e)
            }
        }
    }

    /// Close the link and return to `Disconnected`.
    ///
    /// Accepted from any state and always succeeds; close failures are
    /// logged.
    pub async fn disconnect(&mut self) -> Result<()> {
        let state = self.state();
        if state == DeviceState::Disconnected {
            return Ok(());
        }

        if state != DeviceState::Uninitialized {
            self.close_quietly().await;
        }
        self.status.started_at = None;
        self.transition(DeviceState::Disconnected, "Disconnected");
        info!(device_id = %self.id, from = %state, "Device stopped");
        Ok(())
    }

    /// Stop polling and close the link. Same as [`disconnect`](Self::disconnect).
    pub async fn stop(&mut self) -> Result<()> {
        self.disconnect().await
    }

    /// Begin polling. Valid from `Connected` and `Paused`.
    pub fn start(&mut self) -> Result<()> {
        self.ensure("start", DeviceState::Running)?;
        self.status.started_at = Some(Utc::now());
        self.transition(DeviceState::Running, "Reading");
        Ok(())
    }

    /// Suspend polling without closing the link.
    pub fn pause(&mut self) -> Result<()> {
        self.ensure("pause", DeviceState::Paused)?;
        self.transition(DeviceState::Paused, "Paused");
        Ok(())
    }

    /// Resume polling after [`pause`](Self::pause).
    pub fn resume(&mut self) -> Result<()> {
        let state = self.state();
        if state != DeviceState::Paused {
            return Err(HardwareError::invalid_state("resume", state));
        }
        self.transition(DeviceState::Running, "Reading");
        Ok(())
    }

    /// Switch to synthetic readings.
    pub fn enter_demo(&mut self) -> Result<()> {
        self.initialize();
        if self.state() == DeviceState::Demo {
            return Ok(());
        }
        self.ensure("enter demo mode", DeviceState::Demo)?;
        self.filter.reset_reference();
        self.status.started_at = Some(Utc::now());
        self.transition(DeviceState::Demo, "Demo mode");
        Ok(())
    }

    /// Run one polling tick.
    pub async fn poll(&mut self) -> PollOutcome {
        match self.state() {
            DeviceState::Running => self.poll_driver().await,
            DeviceState::Demo => self.poll_simulated(),
            _ => PollOutcome::Idle,
        }
    }

    /// Record that automatic reconnection gave up.
    pub fn report_retry_exhausted(&mut self, attempts: u32) {
        let error = HardwareError::RetryExhausted { attempts };
        let message = error.to_string();

        self.status.record_error(message.clone());
        self.transition(DeviceState::Error, message.clone());
        self.status.description = message.clone();
        self.emit_error(message, ErrorSeverity::Critical, false);
    }

    async fn poll_driver(&mut self) -> PollOutcome {
        let started = Instant::now();
        let result = match time::timeout(self.connection_timeout, self.driver.read()).await {
            Ok(result) => result,
            Err(_) => Err(HardwareError::timeout(millis(self.connection_timeout))),
        };
        let now = Instant::now();

        match result {
            Ok(Some(reading)) => {
                self.health.record_success(now, now - started);
                self.forward(reading, false, now)
            }
            Ok(None) => {
                self.health.record_success(now, now - started);
                PollOutcome::NoData
            }
            Err(e) if e.is_protocol_error() => {
                debug!(device_id = %self.id, error = %e, "Dropped malformed sample");
                self.health.record_error();
                self.status.record_error(e.to_string());
                self.emit_error(e.to_string(), ErrorSeverity::Warning, true);
                PollOutcome::ProtocolError
            }
            Err(e) if e.is_connection_error() => {
                warn!(device_id = %self.id, error = %e, "Connection lost");
                self.health.record_error();
                self.status.record_error(e.to_string());
                self.transition(DeviceState::Error, format!("Connection lost: {e}"));
                self.emit_error(e.to_string(), ErrorSeverity::Error, true);
                self.close_quietly().await;
                PollOutcome::ConnectionLost
            }
            Err(e) => {
                warn!(device_id = %self.id, error = %e, "Unrecoverable device error");
                self.health.record_error();
                self.status.record_error(e.to_string());
                self.transition(DeviceState::Error, e.to_string());
                self.emit_error(e.to_string(), ErrorSeverity::Critical, false);
                self.close_quietly().await;
                PollOutcome::Fatal
            }
        }
    }

    fn poll_simulated(&mut self) -> PollOutcome {
        let now = Instant::now();
        self.health.record_success(now, Duration::ZERO);

        match self.driver.simulate() {
            Some(reading) => self.forward(reading, true, now),
            None => PollOutcome::NoData,
        }
    }

    fn forward(&mut self, reading: D::Payload, is_synthetic: bool, now: Instant) -> PollOutcome {
        self.status.received_count += 1;

        let Some(sequence_number) = self.filter.admit(&reading, now) else {
            return PollOutcome::Suppressed;
        };

        self.health.record_forwarded(now);
        self.send(DeviceEvent::DataReceived(DataReceived {
            device_id: self.id.clone(),
            payload: reading,
            sequence_number,
            is_synthetic,
            timestamp: Utc::now(),
        }));
        PollOutcome::Forwarded(sequence_number)
    }

    async fn close_quietly(&mut self) {
        if let Err(e) = self.driver.close().await {
            warn!(device_id = %self.id, error = %e, "Error while closing device");
        }
    }

    fn ensure(&self, operation: &'static str, target: DeviceState) -> Result<()> {
        let state = self.state();
        if state.can_transition_to(target) {
            Ok(())
        } else {
            Err(HardwareError::invalid_state(operation, state))
        }
    }

    /// Commit `to` and emit the matching event. Same-state calls do nothing.
    fn transition(&mut self, to: DeviceState, description: impl Into<String>) {
        let from = self.status.state;
        if from == to {
            return;
        }

        let description = description.into();
        self.status.state = to;
        self.status.description = description.clone();
        self.health.set_polling(to.is_polling(), Instant::now());
        debug!(device_id = %self.id, %from, %to, "State transition");

        self.send(DeviceEvent::StatusChanged(StatusChanged {
            device_id: self.id.clone(),
            old_state: from,
            new_state: to,
            description,
            timestamp: Utc::now(),
        }));
    }

    fn emit_error(&mut self, message: String, severity: ErrorSeverity, recoverable: bool) {
        self.send(DeviceEvent::ErrorOccurred(ErrorOccurred {
            device_id: self.id.clone(),
            message,
            severity,
            recoverable,
            timestamp: Utc::now(),
        }));
    }

    fn send(&self, event: DeviceEvent<D::Payload>) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(event);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
