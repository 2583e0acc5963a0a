//! Scriptable mock driver.
//!
//! [`MockDriver`] behaves like a real driver but its readings and failures are
//! queued from a [`MockHandle`], so tests and demos can drive a device without
//! hardware attached.

use crate::Result;
use crate::error::HardwareError;
use crate::traits::{DeviceDriver, Reading};
use crate::types::DeviceMetadata;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

type Simulator<R> = Box<dyn FnMut(u64) -> R + Send>;

/// Next thing `read` returns.
enum Step<R> {
    Reading(R),
    Fail(HardwareError),
}

/// Shared between the driver and its handles.
#[derive(Debug, Default)]
struct Control {
    open: AtomicBool,
    open_calls: AtomicU32,
    close_calls: AtomicU32,
    failing_connects: AtomicU32,
    failing_closes: AtomicU32,
    open_delay_ms: AtomicU64,
}

/// Mock driver for testing and development.
///
/// # Examples
///
/// ```
/// use weighlink_hardware::mock::{MockDriver, WeightReading};
/// use weighlink_hardware::traits::DeviceDriver;
///
/// #[tokio::main]
/// async fn main() -> weighlink_hardware::Result<()> {
///     let (mut driver, handle) = MockDriver::scale("Dock 1");
///
///     driver.open().await?;
///     handle.push(WeightReading::stable(1250.0))?;
///
///     let reading = driver.read().await?.unwrap();
///     assert_eq!(reading.weight, 1250.0);
///     assert!(driver.read().await?.is_none());
///
///     Ok(())
/// }
/// ```
pub struct MockDriver<R: Reading> {
    metadata: DeviceMetadata,
    steps_rx: mpsc::UnboundedReceiver<Step<R>>,
    control: Arc<Control>,
    simulator: Option<Simulator<R>>,
    ticks: u64,
}

impl<R: Reading> MockDriver<R> {
    /// Create a driver with no demo source.
    ///
    /// Returns the driver and a handle for scripting it.
    pub fn new(metadata: DeviceMetadata) -> (Self, MockHandle<R>) {
        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let control = Arc::new(Control::default());

        let driver = Self {
            metadata,
            steps_rx,
            control: Arc::clone(&control),
            simulator: None,
            ticks: 0,
        };

        (driver, MockHandle { steps_tx, control })
    }

    /// Produce demo readings with `simulator`, called with a tick counter
    /// starting at 0.
    pub fn with_simulator(mut self, simulator: impl FnMut(u64) -> R + Send + 'static) -> Self {
        self.simulator = Some(Box::new(simulator));
        self
    }
}

impl<R: Reading> DeviceDriver for MockDriver<R> {
    type Payload = R;

    fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    async fn open(&mut self) -> Result<()> {
        self.control.open_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.control.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if take_one(&self.control.failing_connects) {
            return Err(HardwareError::connection(format!(
                "{}: connection refused",
                self.metadata.name
            )));
        }

        self.control.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.control.close_calls.fetch_add(1, Ordering::SeqCst);
        self.control.open.store(false, Ordering::SeqCst);

        if take_one(&self.control.failing_closes) {
            return Err(HardwareError::connection("port already released"));
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<R>> {
        if !self.control.open.load(Ordering::SeqCst) {
            return Err(HardwareError::disconnected(self.metadata.name.clone()));
        }

        match self.steps_rx.try_recv() {
            Ok(Step::Reading(reading)) => Ok(Some(reading)),
            Ok(Step::Fail(error)) => {
                if error.is_connection_error() {
                    self.control.open.store(false, Ordering::SeqCst);
                }
                Err(error)
            }
            // Empty queue or all handles dropped: nothing new
            Err(_) => Ok(None),
        }
    }

    fn simulate(&mut self) -> Option<R> {
        let simulator = self.simulator.as_mut()?;
        let tick = self.ticks;
        self.ticks += 1;
        Some(simulator(tick))
    }
}

/// Decrement `counter` if positive. Returns whether it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Handle for scripting a [`MockDriver`].
pub struct MockHandle<R> {
    steps_tx: mpsc::UnboundedSender<Step<R>>,
    control: Arc<Control>,
}

impl<R> Clone for MockHandle<R> {
    fn clone(&self) -> Self {
        Self {
            steps_tx: self.steps_tx.clone(),
            control: Arc::clone(&self.control),
        }
    }
}

impl<R: Reading> MockHandle<R> {
    /// Queue a reading for the next `read`.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver has been dropped.
    pub fn push(&self, reading: R) -> Result<()> {
        self.send(Step::Reading(reading))
    }

    /// Make a future `read` fail with `error`, in queue order.
    pub fn fail_next_read(&self, error: HardwareError) -> Result<()> {
        self.send(Step::Fail(error))
    }

    /// Simulate the cable being pulled.
    pub fn unplug(&self) -> Result<()> {
        self.fail_next_read(HardwareError::disconnected("cable unplugged"))
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.control.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make the next call to `close` fail.
    pub fn fail_next_close(&self) {
        self.control.failing_closes.store(1, Ordering::SeqCst);
    }

    /// Delay every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.control.open_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.control.open.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u32 {
        self.control.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.control.close_calls.load(Ordering::SeqCst)
    }

    fn send(&self, step: Step<R>) -> Result<()> {
        self.steps_tx
            .send(step)
            .map_err(|_| HardwareError::disconnected("mock driver dropped"))
    }
}
