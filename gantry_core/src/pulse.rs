//! Time-of-flight distance measurement over a trigger/echo line pair.
//!
//! Every wait is bounded by an explicit window measured on the injected
//! `Clock`, so a dead or disconnected ranger yields `Timeout` instead of
//! hanging the tick.
use std::time::{Duration, Instant};

use gantry_traits::{Clock, InputLine, OutputLine};
use tracing::trace;

use crate::config::Timeouts;
use crate::error::SensorError;
use crate::hw_error::map_device_error;

pub const SPEED_OF_SOUND_CM_PER_S: f64 = 34_300.0;
pub const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Distance for a round-trip echo of width `elapsed`.
#[inline]
pub fn distance_cm(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * SPEED_OF_SOUND_CM_PER_S / 2.0
}

#[derive(Debug, Clone, Copy)]
pub struct PulseTiming {
    /// Max wait for the echo to go high after the trigger.
    pub rise_timeout: Duration,
    /// Max echo width.
    pub fall_timeout: Duration,
    /// Zero spins.
    pub poll: Duration,
}

impl PulseTiming {
    /// Worst case for one `measure`: trigger pulse, both echo windows and
    /// the poll that overshoots each of them.
    pub fn bound(&self) -> Duration {
        TRIGGER_PULSE + self.rise_timeout + self.fall_timeout + self.poll * 2
    }
}

impl From<&Timeouts> for PulseTiming {
    fn from(t: &Timeouts) -> Self {
        Self {
            rise_timeout: t.echo_rise,
            fall_timeout: t.echo_fall,
            poll: t.echo_poll,
        }
    }
}

pub struct PulseDistanceSensor<T, E, C> {
    trigger: T,
    echo: E,
    clock: C,
    timing: PulseTiming,
}

impl<T: OutputLine, E: InputLine, C: Clock> PulseDistanceSensor<T, E, C> {
    pub fn new(trigger: T, echo: E, clock: C, timing: PulseTiming) -> Self {
        Self {
            trigger,
            echo,
            clock,
            timing,
        }
    }

    pub fn timing(&self) -> PulseTiming {
        self.timing
    }

    /// Drive the trigger to its idle level.
    pub fn settle(&mut self) -> Result<(), SensorError> {
        self.trigger.set_low().map_err(|e| map_device_error(&*e))
    }

    /// One measurement in centimetres.
    pub fn measure(&mut self) -> Result<f64, SensorError> {
        self.trigger.set_high().map_err(|e| map_device_error(&*e))?;
        self.clock.sleep(TRIGGER_PULSE);
        self.trigger.set_low().map_err(|e| map_device_error(&*e))?;

        let start = self.wait_for(true, self.timing.rise_timeout, "rise")?;
        let stop = self.wait_for(false, self.timing.fall_timeout, "fall")?;
        let width = stop.saturating_duration_since(start);
        trace!(width_us = width.as_micros() as u64, "echo pulse");
        Ok(distance_cm(width))
    }

    /// Instant at which the echo was first seen at `level`.
    fn wait_for(
        &mut self,
        level: bool,
        window: Duration,
        edge: &'static str,
    ) -> Result<Instant, SensorError> {
        let begin = self.clock.now();
        loop {
            let now = self.clock.now();
            if self.echo.is_high().map_err(|e| map_device_error(&*e))? == level {
                return Ok(now);
            }
            if now.saturating_duration_since(begin) >= window {
                trace!(edge, window_us = window.as_micros() as u64, "echo edge timeout");
                return Err(SensorError::Timeout);
            }
            self.clock.sleep(self.timing.poll);
        }
    }
}
