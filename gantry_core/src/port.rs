//! `SensorPort`: one configured column of the sensor log.
//!
//! Adapters wrap the device-boundary traits from `gantry_traits` and map
//! their errors into `SensorError`, so the assembler only ever sees a value
//! or a typed failure.
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use gantry_traits::{Bus, BusSensor, Clock, InputLine, LineSensor, OutputLine};

use crate::error::SensorError;
use crate::hw_error::map_device_error;
use crate::pulse::PulseDistanceSensor;
use crate::types::SensorValue;

/// Poll interval while waiting for another port to release the bus.
const BUS_LOCK_POLL: Duration = Duration::from_micros(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Shares a clock/data bus with other devices, distinguished by address.
    BusAddressed,
    /// Owns its signal line(s) exclusively.
    DedicatedLine,
    /// Plain digital input.
    BinaryGpio,
}

pub trait SensorPort: Send {
    /// Column header; unique within a run.
    fn id(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Called once before the first tick. Failure here is a misconfiguration.
    fn open(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<SensorValue, SensorError>;

    /// Longest one `read(timeout)` can take. Ports that keep their own
    /// windows report those instead of the configured timeout.
    fn read_bound(&self, timeout: Duration) -> Duration {
        timeout
    }
}

impl<P: SensorPort + ?Sized> SensorPort for Box<P> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn capability(&self) -> Capability {
        (**self).capability()
    }

    fn open(&mut self) -> Result<(), SensorError> {
        (**self).open()
    }

    fn read(&mut self, timeout: Duration) -> Result<SensorValue, SensorError> {
        (**self).read(timeout)
    }

    fn read_bound(&self, timeout: Duration) -> Duration {
        (**self).read_bound(timeout)
    }
}

/// A bus opened once at startup and shared by every bus-addressed port.
pub type SharedBus = Arc<Mutex<Box<dyn Bus + Send>>>;

pub fn shared_bus(bus: impl Bus + Send + 'static) -> SharedBus {
    Arc::new(Mutex::new(Box::new(bus)))
}

fn open_failure(e: &gantry_traits::DeviceError) -> SensorError {
    SensorError::Misconfigured(e.to_string())
}

/// Bus-addressed device. Each transaction holds the bus lock.
pub struct BusPort<S> {
    id: String,
    bus: SharedBus,
    sensor: S,
}

impl<S: BusSensor + Send> BusPort<S> {
    pub fn new(id: impl Into<String>, bus: SharedBus, sensor: S) -> Self {
        Self {
            id: id.into(),
            bus,
            sensor,
        }
    }

    /// Lock the bus, giving up at `deadline`. A poisoned lock is recovered.
    fn with_bus<T>(
        &mut self,
        deadline: Option<Instant>,
        f: impl FnOnce(&mut S, &mut dyn Bus) -> T,
    ) -> Result<T, SensorError> {
        loop {
            match self.bus.try_lock() {
                Ok(mut guard) => return Ok(f(&mut self.sensor, &mut **guard)),
                Err(TryLockError::Poisoned(p)) => {
                    tracing::warn!(sensor = %self.id, "bus lock poisoned; recovering");
                    let mut guard = p.into_inner();
                    return Ok(f(&mut self.sensor, &mut **guard));
                }
                Err(TryLockError::WouldBlock) => {
                    if let Some(d) = deadline
                        && Instant::now() >= d
                    {
                        return Err(SensorError::Timeout);
                    }
                    std::thread::sleep(BUS_LOCK_POLL);
                }
            }
        }
    }
}

impl<S: BusSensor + Send> SensorPort for BusPort<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::BusAddressed
    }

    fn open(&mut self) -> Result<(), SensorError> {
        self.with_bus(None, |s, bus| s.open(bus))?
            .map_err(|e| open_failure(&e))
    }

    fn read(&mut self, timeout: Duration) -> Result<SensorValue, SensorError> {
        let deadline = Instant::now() + timeout;
        self.with_bus(Some(deadline), |s, bus| s.read(bus, timeout))?
            .map(SensorValue::Number)
            .map_err(|e| map_device_error(&*e))
    }
}

/// Dedicated-line device such as one DHT22 channel.
pub struct LinePort<S> {
    id: String,
    sensor: S,
}

impl<S: LineSensor + Send> LinePort<S> {
    pub fn new(id: impl Into<String>, sensor: S) -> Self {
        Self {
            id: id.into(),
            sensor,
        }
    }
}

impl<S: LineSensor + Send> SensorPort for LinePort<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::DedicatedLine
    }

    fn open(&mut self) -> Result<(), SensorError> {
        self.sensor.open().map_err(|e| open_failure(&e))
    }

    fn read(&mut self, timeout: Duration) -> Result<SensorValue, SensorError> {
        self.sensor
            .read(timeout)
            .map(SensorValue::Number)
            .map_err(|e| map_device_error(&*e))
    }
}

/// Binary input. An unreadable line is always a misconfiguration.
pub struct GpioPort<L> {
    id: String,
    line: L,
    active_low: bool,
}

impl<L: InputLine + Send> GpioPort<L> {
    pub fn new(id: impl Into<String>, line: L) -> Self {
        Self {
            id: id.into(),
            line,
            active_low: false,
        }
    }

    pub fn active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    fn level(&mut self) -> Result<bool, SensorError> {
        self.line
            .is_high()
            .map(|high| high != self.active_low)
            .map_err(|e| SensorError::Misconfigured(e.to_string()))
    }
}

impl<L: InputLine + Send> SensorPort for GpioPort<L> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::BinaryGpio
    }

    fn open(&mut self) -> Result<(), SensorError> {
        // Probe once so a dead line fails before the first tick.
        self.level().map(|_| ())
    }

    fn read(&mut self, _timeout: Duration) -> Result<SensorValue, SensorError> {
        self.level().map(SensorValue::Flag)
    }
}

/// Ultrasonic ranger. Uses its own rise/fall windows instead of the
/// per-read timeout.
pub struct PulsePort<T, E, C> {
    id: String,
    sensor: PulseDistanceSensor<T, E, C>,
}

impl<T, E, C> PulsePort<T, E, C>
where
    T: OutputLine + Send,
    E: InputLine + Send,
    C: Clock + Send,
{
    pub fn new(id: impl Into<String>, sensor: PulseDistanceSensor<T, E, C>) -> Self {
        Self {
            id: id.into(),
            sensor,
        }
    }
}

impl<T, E, C> SensorPort for PulsePort<T, E, C>
where
    T: OutputLine + Send,
    E: InputLine + Send,
    C: Clock + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::DedicatedLine
    }

    fn open(&mut self) -> Result<(), SensorError> {
        self.sensor.settle()
    }

    fn read(&mut self, _timeout: Duration) -> Result<SensorValue, SensorError> {
        self.sensor.measure().map(SensorValue::Number)
    }

    fn read_bound(&self, _timeout: Duration) -> Duration {
        self.sensor.timing().bound()
    }
}
