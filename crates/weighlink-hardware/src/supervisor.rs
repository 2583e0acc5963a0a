//! Per-device supervision task.
//!
//! Each registered device runs in its own Tokio task that owns the
//! [`Device`] exclusively. The outside world talks to it through a cloneable
//! [`DeviceHandle`]: commands go in over an mpsc queue with oneshot replies,
//! status and health snapshots come out over watch channels.
//!
//! ```text
//!   DeviceHandle ──cmd──► ┌────────────── supervise() ───────────────┐
//!                         │ select! (biased)                          │
//!                         │   cancel ─► stop, exit                    │
//!                         │   command ─► Device op ─► reply           │
//!                         │   retry deadline ─► connect (backoff)     │
//!                         │   poll tick ─► Device::poll               │
//!                         │   health tick                             │
//!                         └───────────────┬───────────────────────────┘
//!   DeviceHandle ◄──watch── status/health ┘
//! ```
//!
//! The reconnection timer lives inside the same loop, so cancelling the task
//! also cancels any pending retry.

use crate::config::ManagerConfig;
use crate::device::{Device, PollOutcome};
use crate::error::{HardwareError, Result};
use crate::health::DeviceHealth;
use crate::reconnect::{ReconnectScheduler, RetryDecision};
use crate::state::DeviceState;
use crate::traits::DeviceDriver;
use crate::types::{DeviceMetadata, DeviceStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weighlink_core::{DeviceId, DeviceType};

type Reply = oneshot::Sender<Result<()>>;

/// Requests handled by the supervision loop.
#[derive(Debug)]
enum Command {
    Connect(Reply),
    Start(Reply),
    Pause(Reply),
    Resume(Reply),
    Stop(Reply),
    EnterDemo(Reply),
    Reconnect(Reply),
}

/// Cloneable control surface for one supervised device.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    metadata: Arc<DeviceMetadata>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<DeviceStatus>,
    health: watch::Receiver<DeviceHealth>,
}

impl DeviceHandle {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    pub fn device_type(&self) -> DeviceType {
        self.metadata.device_type
    }

    /// Latest published status.
    pub fn status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> DeviceState {
        self.status.borrow().state
    }

    /// Latest published health snapshot.
    pub fn health(&self) -> DeviceHealth {
        self.health.borrow().clone()
    }

    /// Subscribe to status snapshots.
    pub fn watch_status(&self) -> watch::Receiver<DeviceStatus> {
        self.status.clone()
    }

    /// Wait until the device reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::Disconnected`] if the supervision loop ends
    /// first.
    pub async fn wait_for_state(&self, state: DeviceState) -> Result<DeviceStatus> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.state == state)
            .await
            .map(|s| s.clone())
            .map_err(|_| self.gone())
    }

    /// Whether the supervision loop is still running.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await
    }

    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    /// Stop polling, cancel any pending retry and close the link.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    pub async fn enter_demo(&self) -> Result<()> {
        self.request(Command::EnterDemo).await
    }

    /// Reset the retry budget and connect again.
    ///
    /// This is the only way out of `Error` after automatic reconnection gave
    /// up.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(Command::Reconnect).await
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())?
    }

    fn gone(&self) -> HardwareError {
        HardwareError::disconnected(self.id.to_string())
    }
}

/// Spawn the supervision loop for `device`.
///
/// The device's event receiver must already have been taken by the caller.
pub(crate) fn spawn<D: DeviceDriver>(
    mut device: Device<D>,
    config: &ManagerConfig,
    cancel: CancellationToken,
) -> (DeviceHandle, JoinHandle<()>) {
    device.initialize();

    let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
    let (status_tx, status_rx) = watch::channel(device.status().clone());
    let (health_tx, health_rx) = watch::channel(device.health());

    let handle = DeviceHandle {
        id: device.id().clone(),
        metadata: Arc::new(device.metadata().clone()),
        commands: commands_tx,
        status: status_rx,
        health: health_rx,
    };

    let supervisor = Supervisor {
        scheduler: ReconnectScheduler::new(device.reconnection_policy().clone()),
        device,
        status_tx,
        health_tx,
        retry_at: None,
        resume_reading: false,
    };

    let task = tokio::spawn(supervise(supervisor, commands_rx, cancel, config.health_tick));
    (handle, task)
}

struct Supervisor<D: DeviceDriver> {
    device: Device<D>,
    scheduler: ReconnectScheduler,
    status_tx: watch::Sender<DeviceStatus>,
    health_tx: watch::Sender<DeviceHealth>,
    /// Deadline of the pending automatic reconnect.
    retry_at: Option<Instant>,
    /// The link dropped while reading; restart reading once reconnected.
    resume_reading: bool,
}

async fn supervise<D: DeviceDriver>(
    mut supervisor: Supervisor<D>,
    mut commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    health_tick: Duration,
) {
    let id = supervisor.device.id().clone();
    debug!(device_id = %id, "Supervisor started");

    let mut poll = time::interval(supervisor.device.polling_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut health = time::interval(health_tick);
    health.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let polling = supervisor.device.state().is_polling();
        let retry_at = supervisor.retry_at;

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => {
                    let (reply, result) = supervisor.handle(command).await;
                    // Callers must see the committed state once they get the reply
                    supervisor.publish();
                    let _ = reply.send(result);
                }
                None => break,
            },
            () = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                supervisor.retry_at = None;
                supervisor.attempt_reconnect().await;
            }
            _ = poll.tick(), if polling => supervisor.poll_once().await,
            _ = health.tick() => {}
        }

        supervisor.publish();
    }

    supervisor.retry_at = None;
    // stop() never fails
    let _ = supervisor.device.stop().await;
    supervisor.publish();
    debug!(device_id = %id, "Supervisor stopped");
}

impl<D: DeviceDriver> Supervisor<D> {
    /// Run `command` and return its reply channel with the outcome.
    async fn handle(&mut self, command: Command) -> (Reply, Result<()>) {
        match command {
            Command::Connect(reply) => {
                self.cancel_retry();
                self.resume_reading = false;
                let result = self.device.connect().await;
                if let Err(e) = &result
                    && e.is_connection_error()
                {
                    self.schedule_retry();
                }
                (reply, result)
            }
            Command::Start(reply) => (reply, self.device.start()),
            Command::Pause(reply) => (reply, self.device.pause()),
            Command::Resume(reply) => (reply, self.device.resume()),
            Command::Stop(reply) => {
                self.cancel_retry();
                self.resume_reading = false;
                (reply, self.device.stop().await)
            }
            Command::EnterDemo(reply) => {
                let result = self.device.enter_demo();
                if result.is_ok() {
                    self.cancel_retry();
                    self.resume_reading = false;
                }
                (reply, result)
            }
            Command::Reconnect(reply) => {
                self.cancel_retry();
                info!(device_id = %self.device.id(), "Manual reconnect requested");

                if !self.device.state().can_connect() {
                    let _ = self.device.disconnect().await;
                }
                let result = self.device.connect().await;
                match &result {
                    Ok(()) => self.restart_reading(),
                    Err(e) if e.is_connection_error() => self.schedule_retry(),
                    Err(_) => {}
                }
                (reply, result)
            }
        }
    }

    async fn poll_once(&mut self) {
        match self.device.poll().await {
            PollOutcome::ConnectionLost => {
                self.resume_reading = true;
                self.schedule_retry();
            }
            PollOutcome::Fatal => {
                self.resume_reading = false;
                error!(device_id = %self.device.id(), "Device failed; not retrying");
            }
            _ => {}
        }
    }

    async fn attempt_reconnect(&mut self) {
        let id = self.device.id().clone();
        debug!(device_id = %id, attempt = self.scheduler.attempts(), "Reconnecting");

        match self.device.connect().await {
            Ok(()) => {
                info!(device_id = %id, attempts = self.scheduler.attempts(), "Reconnected");
                self.restart_reading();
            }
            Err(e) if e.is_connection_error() => self.schedule_retry(),
            Err(e) => {
                self.resume_reading = false;
                warn!(device_id = %id, error = %e, "Reconnect failed; giving up");
            }
        }
    }

    fn restart_reading(&mut self) {
        self.scheduler.reset();
        if std::mem::take(&mut self.resume_reading)
            && let Err(e) = self.device.start()
        {
            warn!(device_id = %self.device.id(), error = %e, "Could not restart reading");
        }
    }

    fn schedule_retry(&mut self) {
        let id = self.device.id().clone();

        match self.scheduler.next_attempt() {
            RetryDecision::Retry { attempt, delay } => {
                info!(
                    device_id = %id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            RetryDecision::Exhausted { attempts } => {
                error!(device_id = %id, attempts, "Reconnection gave up");
                self.retry_at = None;
                self.device.report_retry_exhausted(attempts);
            }
            RetryDecision::Disabled => {
                debug!(device_id = %id, "Reconnection disabled");
            }
        }
    }

    fn cancel_retry(&mut self) {
        if self.retry_at.take().is_some() {
            debug!(device_id = %self.device.id(), "Pending reconnect cancelled");
        }
        self.scheduler.reset();
    }

    fn publish(&mut self) {
        self.status_tx.send_replace(self.device.status().clone());
        self.health_tx.send_replace(self.device.health());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDriver, MockHandle, WeightReading};
    use crate::reconnect::ReconnectionPolicy;

    fn spawn_scale(
        policy: ReconnectionPolicy,
    ) -> (DeviceHandle, JoinHandle<()>, MockHandle<WeightReading>, CancellationToken) {
        let (driver, mock) = MockDriver::scale("Dock 1");
        let mut device = Device::new(DeviceId::new("scale-1").unwrap(), driver)
            .with_polling_interval(Duration::from_millis(50))
            .with_reconnection_policy(policy);
        drop(device.take_event_receiver());

        let cancel = CancellationToken::new();
        let (handle, task) = spawn(device, &ManagerConfig::default(), cancel.clone());
        (handle, task, mock, cancel)
    }

    fn fast_policy(max_retries: Option<u32>) -> ReconnectionPolicy {
        ReconnectionPolicy {
            max_retries,
            retry_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            ..ReconnectionPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_drive_state() {
        let (handle, _task, _mock, _cancel) = spawn_scale(fast_policy(Some(3)));
        assert_eq!(handle.state(), DeviceState::Disconnected);

        handle.connect().await.unwrap();
        handle.start().await.unwrap();
        assert_eq!(handle.state(), DeviceState::Running);

        handle.pause().await.unwrap();
        assert!(handle.pause().await.is_err());
        handle.resume().await.unwrap();

        handle.stop().await.unwrap();
        assert_eq!(handle.state(), DeviceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_resumes_reading() {
        let (handle, _task, mock, _cancel) = spawn_scale(fast_policy(Some(3)));
        handle.connect().await.unwrap();
        handle.start().await.unwrap();

        mock.fail_next_connects(1);
        mock.unplug().unwrap();
        handle.wait_for_state(DeviceState::Error).await.unwrap();

        // First retry fails, second one succeeds and reading restarts
        handle.wait_for_state(DeviceState::Running).await.unwrap();
        assert_eq!(mock.open_count(), 3);
        assert!(mock.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_requires_manual_reconnect() {
        let (handle, _task, mock, _cancel) = spawn_scale(fast_policy(Some(2)));
        handle.connect().await.unwrap();
        handle.start().await.unwrap();

        mock.fail_next_connects(10);
        mock.unplug().unwrap();

        let mut status = handle.watch_status();
        let exhausted = status
            .wait_for(|s| s.description.starts_with("Reconnection gave up"))
            .await
            .unwrap()
            .clone();
        assert_eq!(exhausted.state, DeviceState::Error);
        assert_eq!(mock.open_count(), 3);

        // Nothing else happens on its own
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.open_count(), 3);
        assert_eq!(handle.state(), DeviceState::Error);

        mock.fail_next_connects(0);
        handle.reconnect().await.unwrap();
        assert_eq!(handle.state(), DeviceState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let (handle, _task, mock, _cancel) = spawn_scale(fast_policy(None));
        mock.fail_next_connects(1);

        assert!(handle.connect().await.is_err());
        handle.stop().await.unwrap();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.open_count(), 1);
        assert_eq!(handle.state(), DeviceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_loop_and_closes_link() {
        let (handle, task, mock, cancel) = spawn_scale(fast_policy(None));
        handle.connect().await.unwrap();
        handle.start().await.unwrap();

        cancel.cancel();
        task.await.unwrap();

        assert!(!mock.is_open());
        assert_eq!(handle.state(), DeviceState::Disconnected);
        assert!(!handle.is_alive());
        assert!(matches!(
            handle.start().await,
            Err(HardwareError::Disconnected { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_connect_does_not_resume_reading_later() {
        let (handle, _task, mock, _cancel) = spawn_scale(ReconnectionPolicy::disabled());
        handle.connect().await.unwrap();
        handle.start().await.unwrap();

        mock.unplug().unwrap();
        handle.wait_for_state(DeviceState::Error).await.unwrap();

        // The operator connects by hand and leaves the device idle
        handle.connect().await.unwrap();
        assert_eq!(handle.state(), DeviceState::Connected);

        handle.reconnect().await.unwrap();
        assert_eq!(handle.state(), DeviceState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_is_published_before_reply() {
        let (handle, _task, _mock, _cancel) = spawn_scale(ReconnectionPolicy::disabled());

        for _ in 0..500 {
            handle.connect().await.unwrap();
            assert_eq!(handle.state(), DeviceState::Connected);
            handle.start().await.unwrap();
            assert_eq!(handle.state(), DeviceState::Running);
            handle.stop().await.unwrap();
            assert_eq!(handle.state(), DeviceState::Disconnected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_updates_status() {
        let (handle, _task, mock, _cancel) = spawn_scale(fast_policy(None));
        handle.connect().await.unwrap();
        handle.start().await.unwrap();

        mock.push(WeightReading::stable(1000.0)).unwrap();
        mock.push(WeightReading::stable(1010.0)).unwrap();

        let mut status = handle.watch_status();
        status.wait_for(|s| s.received_count == 2).await.unwrap();
    }
}
