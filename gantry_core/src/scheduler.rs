//! Fixed-period acquisition loop.
//!
//! Per tick: timestamp, assemble, capture, persist, sleep the remainder of the
//! period. Termination is a cooperative flag checked at tick boundaries, so a
//! tick is either fully persisted or never started.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use gantry_traits::clock::{Clock, MonotonicClock};
use tracing::{debug, error, info, warn};

use crate::assembler::RecordAssembler;
use crate::config::{RowFormat, RunCfg};
use crate::error::{AcqError, Report, Result};
use crate::image::ImageCorrelator;
use crate::sink::LogTarget;
use crate::status::{RunSummary, ScheduleState, StateHandle, StopReason};
use crate::types::Timestamp;

/// Longest uninterrupted sleep between flag checks.
const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Run-scoped tick counter, starting at 1. Only advanced after a tick is
/// persisted.
#[derive(Debug)]
pub struct SequenceCounter {
    next: u64,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SequenceCounter {
    pub fn peek(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) {
        self.next += 1;
    }
}

pub struct AcquisitionScheduler<C: Clock = MonotonicClock> {
    clock: C,
    run: RunCfg,
    assembler: RecordAssembler,
    correlator: ImageCorrelator,
    logs: Option<LogTarget>,
    format: RowFormat,
    shutdown: Arc<AtomicBool>,
    state: StateHandle,
    counter: SequenceCounter,
}

impl<C: Clock> AcquisitionScheduler<C> {
    pub(crate) fn new(
        clock: C,
        run: RunCfg,
        assembler: RecordAssembler,
        correlator: ImageCorrelator,
        logs: LogTarget,
        format: RowFormat,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            clock,
            run,
            assembler,
            correlator,
            logs: Some(logs),
            format,
            shutdown,
            state: StateHandle::new(),
            counter: SequenceCounter::default(),
        }
    }

    /// Flag that ends the run at the next tick boundary.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.assembler.sensor_ids()
    }

    /// Run until the duration elapses, the tick limit is hit, or the flag is
    /// raised. Fatal faults (persistence, misconfigured sensor) end the run
    /// with an error after the state has moved to `Stopped`.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state.get() != ScheduleState::Idle {
            return Err(Report::new(AcqError::State(
                "scheduler has already run".into(),
            )));
        }
        let res = self.run_inner();
        self.state.set(ScheduleState::Stopped);
        res
    }

    fn run_inner(&mut self) -> Result<RunSummary> {
        self.assembler.open().map_err(|f| {
            error!(sensor = %f.sensor_id, error = %f.error, "sensor failed to open");
            AcqError::SensorMisconfigured {
                sensor: f.sensor_id,
                reason: f.error.to_string(),
            }
        })?;
        self.correlator
            .prepare()
            .map_err(|e| AcqError::Persistence(format!("image directory: {e}")))?;
        let ids = self.assembler.sensor_ids();
        let target = self
            .logs
            .take()
            .ok_or_else(|| AcqError::State("logs already consumed".into()))?;
        let mut logs = target.open(&ids, self.format.clone())?;

        let mut summary = RunSummary::new(&ids);
        let period = self.run.period;
        let started = self.clock.now();
        self.state.set(ScheduleState::Running);
        info!(
            sensors = ids.len(),
            period_ms = period.as_millis() as u64,
            camera = self.correlator.is_enabled(),
            "acquisition started"
        );

        let reason = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break StopReason::Signal;
            }
            if let Some(d) = self.run.duration
                && self.clock.now().saturating_duration_since(started) >= d
            {
                break StopReason::Elapsed;
            }
            if let Some(max) = self.run.max_ticks
                && summary.ticks >= max
            {
                break StopReason::TickLimit;
            }

            let tick_start = self.clock.now();
            let sequence = self.counter.peek();
            let mut assembled = self
                .assembler
                .assemble(sequence, Timestamp::new(tick_start, Utc::now()));
            if assembled.fatal().is_some() {
                // The tick is still persisted before the run ends.
                self.state.set(ScheduleState::Terminating);
            }

            match self.correlator.capture(sequence) {
                Ok(image_ref) => assembled.record.image_ref = image_ref,
                Err(e) => {
                    warn!(sequence, error = %e, "image capture failed");
                    summary.image_failures += 1;
                }
            }

            if let Err(e) = logs.write(&assembled.record) {
                error!(sequence, error = %e, "persistence failed; aborting run");
                self.state.set(ScheduleState::Terminating);
                return Err(Report::new(e));
            }
            self.counter.advance();

            summary.ticks += 1;
            summary.last_sequence = Some(sequence);
            if assembled.record.is_partial() {
                summary.partial_ticks += 1;
            }
            for (slot, reading) in summary.absent.iter_mut().zip(&assembled.record.readings) {
                if reading.value.is_none() {
                    slot.1 += 1;
                }
            }

            if let Some(fatal) = assembled.fatal() {
                error!(
                    sequence,
                    sensor = %fatal.sensor_id,
                    error = %fatal.error,
                    "sensor misconfigured; aborting run"
                );
                return Err(Report::new(AcqError::SensorMisconfigured {
                    sensor: fatal.sensor_id.clone(),
                    reason: fatal.error.to_string(),
                }));
            }

            let work = self.clock.now().saturating_duration_since(tick_start);
            summary.latency.record(work);
            if work > period {
                summary.overruns += 1;
                debug!(sequence, work_us = work.as_micros() as u64, "tick overran period");
            }
            debug!(
                sequence,
                absent = assembled.record.absent_count(),
                elapsed_us = work.as_micros() as u64,
                "tick persisted"
            );
            self.pause(period.saturating_sub(work));
        };

        self.state.set(ScheduleState::Terminating);
        summary.stop_reason = reason;
        info!(
            ticks = summary.ticks,
            partial = summary.partial_ticks,
            reason = reason.as_str(),
            "acquisition stopped"
        );
        Ok(summary)
    }

    /// Sleep up to `total`, returning early once the flag is raised.
    fn pause(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let step = remaining.min(PAUSE_SLICE);
            self.clock.sleep(step);
            remaining -= step;
        }
    }
}
