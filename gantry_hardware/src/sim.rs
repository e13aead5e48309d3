//! Simulated devices for running the pipeline without hardware.
//!
//! Every stand-in owns its own state. Failure timing is an explicit
//! [`FaultSchedule`] keyed by the 1-based read index, so a test decides
//! exactly which read fails and how.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gantry_traits::{
    Bus, BusSensor, Camera, Clock, DeviceError, InputLine, LineSensor, OutputLine,
};
use tracing::trace;

use crate::error::HwError;

/// Speed of sound used to turn a simulated distance into an echo width.
const SPEED_OF_SOUND_CM_PER_S: f64 = 34_300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Device did not answer in time.
    Timeout,
    /// Transient refusal (busy, bad checksum).
    Busy,
    /// Line cannot be read at all.
    Unreadable,
}

impl Fault {
    fn into_error(self) -> HwError {
        match self {
            Fault::Timeout => HwError::Timeout,
            Fault::Busy => HwError::NotReady("simulated busy".into()),
            Fault::Unreadable => HwError::Gpio("simulated unreadable line".into()),
        }
    }
}

/// Deterministic per-read outcomes. Reads not listed succeed.
#[derive(Debug, Clone, Default)]
pub struct FaultSchedule {
    faults: BTreeMap<u64, Fault>,
}

impl FaultSchedule {
    pub fn none() -> Self {
        Self::default()
    }

    /// Fail the given 1-based reads with `fault`.
    pub fn at(reads: &[u64], fault: Fault) -> Self {
        Self::default().with(reads, fault)
    }

    pub fn with(mut self, reads: &[u64], fault: Fault) -> Self {
        for r in reads {
            self.faults.insert(*r, fault);
        }
        self
    }

    /// Build from a per-read outcome list; index 0 is read 1.
    pub fn from_outcomes(outcomes: &[Option<Fault>]) -> Self {
        let mut s = Self::default();
        for (i, o) in outcomes.iter().enumerate() {
            if let Some(f) = o {
                s.faults.insert(i as u64 + 1, *f);
            }
        }
        s
    }

    pub fn outcome(&self, read: u64) -> Option<Fault> {
        self.faults.get(&read).copied()
    }
}

/// Value strategy for a simulated numeric sensor.
#[derive(Debug, Clone)]
pub enum Waveform {
    Constant(f64),
    /// `start + step * (read - 1)`
    Ramp { start: f64, step: f64 },
    /// Recorded series, cycled. `None` entries are failed reads.
    Replay(Vec<Option<f64>>),
}

impl Waveform {
    fn sample(&self, read: u64) -> Option<f64> {
        match self {
            Waveform::Constant(v) => Some(*v),
            Waveform::Ramp { start, step } => Some(start + step * (read.saturating_sub(1)) as f64),
            Waveform::Replay(series) if series.is_empty() => None,
            Waveform::Replay(series) => {
                let idx = (read.saturating_sub(1) % series.len() as u64) as usize;
                series.get(idx).copied().flatten()
            }
        }
    }
}

/// Numeric sensor usable on a dedicated line or on a simulated bus.
pub struct SimSensor {
    address: u16,
    waveform: Waveform,
    faults: FaultSchedule,
    latency: Duration,
    reads: u64,
}

impl SimSensor {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            address: 0,
            waveform,
            faults: FaultSchedule::none(),
            latency: Duration::ZERO,
            reads: 0,
        }
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.address = address;
        self
    }

    pub fn with_faults(mut self, faults: FaultSchedule) -> Self {
        self.faults = faults;
        self
    }

    /// Real time spent inside every read (for concurrency tests).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn next_value(&mut self, timeout: Duration) -> Result<f64, HwError> {
        self.reads += 1;
        let read = self.reads;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency.min(timeout));
            if self.latency > timeout {
                return Err(HwError::Timeout);
            }
        }
        if let Some(fault) = self.faults.outcome(read) {
            trace!(read, ?fault, "sim fault injected");
            return Err(fault.into_error());
        }
        self.waveform
            .sample(read)
            .ok_or_else(|| HwError::NotReady("no recorded value".into()))
    }
}

impl LineSensor for SimSensor {
    fn read(&mut self, timeout: Duration) -> Result<f64, DeviceError> {
        Ok(self.next_value(timeout)?)
    }
}

impl BusSensor for SimSensor {
    fn address(&self) -> u16 {
        self.address
    }

    fn read(&mut self, bus: &mut dyn Bus, timeout: Duration) -> Result<f64, DeviceError> {
        let mut buf = [0u8; 2];
        bus.write_read(self.address, &[0x00], &mut buf)?;
        Ok(self.next_value(timeout)?)
    }
}

/// Shared bus stand-in that fails loudly if two transactions overlap.
#[derive(Clone, Default)]
pub struct SimBus {
    in_use: Arc<AtomicBool>,
    transactions: Arc<AtomicU64>,
    latency: Duration,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    fn transact(&self, address: u16) -> Result<(), DeviceError> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            let msg = format!("bus reentered while addressing {address:#04x}");
            return Err(HwError::I2c(msg).into());
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.in_use.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Bus for SimBus {
    fn write(&mut self, address: u16, _bytes: &[u8]) -> Result<(), DeviceError> {
        self.transact(address)
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DeviceError> {
        buf.fill(0);
        self.transact(address)
    }

    fn write_read(
        &mut self,
        address: u16,
        _bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), DeviceError> {
        buf.fill(0);
        self.transact(address)
    }
}

/// Digital input cycling through a fixed level pattern.
pub struct SimInput {
    levels: Vec<bool>,
    faults: FaultSchedule,
    reads: u64,
}

impl SimInput {
    pub fn constant(level: bool) -> Self {
        Self::pattern(vec![level])
    }

    pub fn pattern(levels: Vec<bool>) -> Self {
        Self {
            levels,
            faults: FaultSchedule::none(),
            reads: 0,
        }
    }

    /// A line that cannot be read on any attempt.
    pub fn unreadable() -> Self {
        Self::pattern(Vec::new())
    }

    pub fn with_faults(mut self, faults: FaultSchedule) -> Self {
        self.faults = faults;
        self
    }
}

impl InputLine for SimInput {
    fn is_high(&mut self) -> Result<bool, DeviceError> {
        self.reads += 1;
        if let Some(fault) = self.faults.outcome(self.reads) {
            return Err(fault.into_error().into());
        }
        if self.levels.is_empty() {
            return Err(Fault::Unreadable.into_error().into());
        }
        let idx = ((self.reads - 1) % self.levels.len() as u64) as usize;
        Ok(self.levels[idx])
    }
}

#[derive(Debug, Default)]
struct PulseState {
    triggered_at: Option<Instant>,
    triggers: u64,
}

/// Trigger/echo pair of an ultrasonic ranger.
///
/// The echo level is a pure function of the clock and the last trigger
/// falling edge: high from `trigger + rise_after` for `width`.
pub struct SimPulseRig<C> {
    clock: C,
    state: Arc<Mutex<PulseState>>,
    rise_after: Option<Duration>,
    width: Option<Duration>,
    faults: FaultSchedule,
}

impl<C: Clock + Clone> SimPulseRig<C> {
    pub fn new(clock: C, rise_after: Duration, width: Duration) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(PulseState::default())),
            rise_after: Some(rise_after),
            width: Some(width),
            faults: FaultSchedule::none(),
        }
    }

    /// Echo width for an obstacle at `distance_cm`.
    pub fn at_distance(clock: C, distance_cm: f64) -> Self {
        let width = Duration::from_secs_f64((2.0 * distance_cm.max(0.0)) / SPEED_OF_SOUND_CM_PER_S);
        Self::new(clock, Duration::from_micros(450), width)
    }

    /// Echo line that stays low forever.
    pub fn never_rises(clock: C) -> Self {
        Self {
            rise_after: None,
            ..Self::new(clock, Duration::ZERO, Duration::ZERO)
        }
    }

    /// Echo line that rises and then stays high forever.
    pub fn never_falls(clock: C, rise_after: Duration) -> Self {
        Self {
            width: None,
            ..Self::new(clock, rise_after, Duration::ZERO)
        }
    }

    /// Make the given 1-based measurements produce no echo at all.
    pub fn with_faults(mut self, faults: FaultSchedule) -> Self {
        self.faults = faults;
        self
    }

    pub fn lines(&self) -> (SimTrigger<C>, SimEcho<C>) {
        (
            SimTrigger {
                clock: self.clock.clone(),
                state: self.state.clone(),
            },
            SimEcho {
                clock: self.clock.clone(),
                state: self.state.clone(),
                rise_after: self.rise_after,
                width: self.width,
                faults: self.faults.clone(),
            },
        )
    }
}

pub struct SimTrigger<C> {
    clock: C,
    state: Arc<Mutex<PulseState>>,
}

impl<C: Clock> OutputLine for SimTrigger<C> {
    fn set_high(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), DeviceError> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio("pulse state poisoned".into()))?;
        st.triggered_at = Some(self.clock.now());
        st.triggers += 1;
        Ok(())
    }
}

pub struct SimEcho<C> {
    clock: C,
    state: Arc<Mutex<PulseState>>,
    rise_after: Option<Duration>,
    width: Option<Duration>,
    faults: FaultSchedule,
}

impl<C: Clock> InputLine for SimEcho<C> {
    fn is_high(&mut self) -> Result<bool, DeviceError> {
        let st = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio("pulse state poisoned".into()))?;
        let (Some(t0), Some(rise_after)) = (st.triggered_at, self.rise_after) else {
            return Ok(false);
        };
        if self.faults.outcome(st.triggers).is_some() {
            return Ok(false);
        }
        let since = self.clock.now().saturating_duration_since(t0);
        if since < rise_after {
            return Ok(false);
        }
        Ok(match self.width {
            Some(w) => since < rise_after + w,
            None => true,
        })
    }
}

/// Camera stand-in producing a tiny JPEG-looking payload.
pub struct SimCamera {
    faults: FaultSchedule,
    captures: u64,
}

impl SimCamera {
    pub fn new() -> Self {
        Self {
            faults: FaultSchedule::none(),
            captures: 0,
        }
    }

    pub fn with_faults(mut self, faults: FaultSchedule) -> Self {
        self.faults = faults;
        self
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera for SimCamera {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.captures += 1;
        if self.faults.outcome(self.captures).is_some() {
            return Err(HwError::Camera("simulated capture failure".into()).into());
        }
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&self.captures.to_be_bytes());
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        Ok(bytes)
    }
}
