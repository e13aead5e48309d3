//! Builder for `AcquisitionScheduler`.
//!
//! `try_build()` validates the assembled pipeline (ports, logs, pacing,
//! row format) before anything is opened.
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use gantry_traits::Camera;
use gantry_traits::clock::{Clock, MonotonicClock};

use crate::assembler::RecordAssembler;
use crate::config::{ReadMode, RowFormat, RunCfg, Timeouts};
use crate::error::{BuildError, Result};
use crate::image::{ImageCorrelator, ImageNaming};
use crate::port::SensorPort;
use crate::scheduler::AcquisitionScheduler;
use crate::sink::LogTarget;

pub struct PipelineBuilder<C = MonotonicClock> {
    ports: Vec<Box<dyn SensorPort>>,
    camera: Option<Box<dyn Camera + Send>>,
    naming: ImageNaming,
    image_dir: Option<PathBuf>,
    run: RunCfg,
    timeouts: Timeouts,
    mode: ReadMode,
    format: RowFormat,
    logs: Option<LogTarget>,
    shutdown: Option<Arc<AtomicBool>>,
    clock: C,
}

impl Default for PipelineBuilder<MonotonicClock> {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            camera: None,
            naming: ImageNaming::default(),
            image_dir: None,
            run: RunCfg::default(),
            timeouts: Timeouts::default(),
            mode: ReadMode::default(),
            format: RowFormat::default(),
            logs: None,
            shutdown: None,
            clock: MonotonicClock::new(),
        }
    }
}

impl PipelineBuilder<MonotonicClock> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> PipelineBuilder<C> {
    /// Swap the clock (tests drive a `TestClock`).
    pub fn with_clock<C2: Clock>(self, clock: C2) -> PipelineBuilder<C2> {
        PipelineBuilder {
            ports: self.ports,
            camera: self.camera,
            naming: self.naming,
            image_dir: self.image_dir,
            run: self.run,
            timeouts: self.timeouts,
            mode: self.mode,
            format: self.format,
            logs: self.logs,
            shutdown: self.shutdown,
            clock,
        }
    }

    /// Append a port; configuration order is column order.
    pub fn port(mut self, port: impl SensorPort + 'static) -> Self {
        self.ports.push(Box::new(port));
        self
    }

    pub fn ports(mut self, ports: impl IntoIterator<Item = Box<dyn SensorPort>>) -> Self {
        self.ports.extend(ports);
        self
    }

    pub fn camera(mut self, camera: Box<dyn Camera + Send>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn image_naming(mut self, naming: ImageNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    pub fn run_cfg(mut self, run: RunCfg) -> Self {
        self.run = run;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn read_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn row_format(mut self, format: RowFormat) -> Self {
        self.format = format;
        self
    }

    pub fn logs(mut self, target: LogTarget) -> Self {
        self.logs = Some(target);
        self
    }

    /// Share an existing termination flag (e.g. one set by a signal handler).
    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn try_build(self) -> Result<AcquisitionScheduler<C>> {
        if self.ports.is_empty() {
            return Err(eyre::Report::new(BuildError::NoSensors));
        }
        let mut seen = HashSet::new();
        for p in &self.ports {
            if !seen.insert(p.id().to_string()) {
                return Err(eyre::Report::new(BuildError::DuplicateSensorId(
                    p.id().to_string(),
                )));
            }
        }
        if self.run.period.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "period must be > 0",
            )));
        }
        if self.timeouts.sensor.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "sensor timeout must be >= 1ms",
            )));
        }
        if !(1..=12).contains(&self.naming.digits) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "image digits must be in [1, 12]",
            )));
        }
        self.format.validate().map_err(eyre::Report::new)?;
        let logs = match self.logs {
            None => return Err(eyre::Report::new(BuildError::MissingSensorLog)),
            Some(LogTarget::Paths { sensor, image }) => {
                if sensor.as_os_str().is_empty() {
                    return Err(eyre::Report::new(BuildError::MissingSensorLog));
                }
                if image.as_os_str().is_empty() {
                    return Err(eyre::Report::new(BuildError::MissingImageLog));
                }
                if sensor == image {
                    return Err(eyre::Report::new(BuildError::InvalidConfig(
                        "sensor and image logs must be different files",
                    )));
                }
                LogTarget::Paths { sensor, image }
            }
            Some(writers) => writers,
        };

        let assembler = RecordAssembler::new(self.ports, self.mode, self.timeouts.sensor);
        let mut correlator = ImageCorrelator::new(self.camera, self.naming);
        if let Some(dir) = self.image_dir {
            correlator = correlator.store_in(dir);
        }
        Ok(AcquisitionScheduler::new(
            self.clock,
            self.run,
            assembler,
            correlator,
            logs,
            self.format,
            self.shutdown.unwrap_or_default(),
        ))
    }
}
