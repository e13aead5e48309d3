//! Scheduler lifecycle and the end-of-run summary.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// `Idle -> Running -> Terminating -> Stopped`. Startup failures go straight
/// from `Idle` to `Stopped`. A fatal fault mid-run also passes through
/// `Terminating`: entered when a misconfigured sensor is seen (before that
/// tick is persisted) or when a write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScheduleState {
    Idle = 0,
    Running = 1,
    Terminating = 2,
    Stopped = 3,
}

impl ScheduleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ScheduleState::Idle,
            1 => ScheduleState::Running,
            2 => ScheduleState::Terminating,
            _ => ScheduleState::Stopped,
        }
    }
}

/// Cloneable, read-only view of a scheduler's state from other threads.
#[derive(Debug, Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ScheduleState::Idle as u8)))
    }

    pub fn get(&self) -> ScheduleState {
        ScheduleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, s: ScheduleState) {
        self.0.store(s as u8, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Configured duration elapsed.
    Elapsed,
    /// Termination flag raised.
    Signal,
    /// `max_ticks` reached.
    TickLimit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Elapsed => "elapsed",
            StopReason::Signal => "signal",
            StopReason::TickLimit => "tick_limit",
        }
    }
}

/// Per-tick work time.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    pub min: Option<Duration>,
    pub max: Duration,
    pub total: Duration,
    pub count: u64,
}

impl LatencyStats {
    pub fn record(&mut self, d: Duration) {
        self.min = Some(self.min.map_or(d, |m| m.min(d)));
        self.max = self.max.max(d);
        self.total += d;
        self.count += 1;
    }

    pub fn avg(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        u32::try_from(self.count).ok().map(|n| self.total / n)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Ticks persisted.
    pub ticks: u64,
    /// Ticks with at least one absent reading.
    pub partial_ticks: u64,
    /// Absent readings per sensor, in configuration order.
    pub absent: Vec<(String, u64)>,
    pub image_failures: u64,
    /// Ticks whose work took longer than the period.
    pub overruns: u64,
    pub latency: LatencyStats,
    pub last_sequence: Option<u64>,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub(crate) fn new(sensor_ids: &[String]) -> Self {
        Self {
            ticks: 0,
            partial_ticks: 0,
            absent: sensor_ids.iter().map(|id| (id.clone(), 0)).collect(),
            image_failures: 0,
            overruns: 0,
            latency: LatencyStats::default(),
            last_sequence: None,
            stop_reason: StopReason::Elapsed,
        }
    }
}
