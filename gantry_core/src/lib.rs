#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Synchronized multi-sensor acquisition and logging pipeline (hardware-agnostic).
//!
//! All device access goes through the traits in `gantry_traits`.
//!
//! ## Architecture
//!
//! - **Ports**: `SensorPort` adapters over bus-addressed, dedicated-line and
//!   binary GPIO devices (`port`), plus the ultrasonic `PulseDistanceSensor` (`pulse`)
//! - **Assembly**: one ordered `Record` per tick; failed reads become absent values (`assembler`)
//! - **Concurrency**: optional per-port worker threads joined every tick (`worker`)
//! - **Images**: per-tick capture named by sequence (`image`)
//! - **Persistence**: sensor and image logs written as one unit per tick (`sink`)
//! - **Scheduling**: fixed-period loop with cooperative termination (`scheduler`, `status`)

pub mod assembler;
pub mod atomic;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod image;
pub mod mocks;
pub mod port;
pub mod pulse;
pub mod scheduler;
pub mod sink;
pub mod status;
pub mod types;
pub mod worker;

pub use assembler::{Assembled, PortFault, RecordAssembler};
pub use builder::PipelineBuilder;
pub use config::{DisplayZone, ReadMode, RowFormat, RunCfg, Timeouts};
pub use error::{AcqError, BuildError, ImageCaptureError, SensorError};
pub use image::{ImageCorrelator, ImageNaming};
pub use port::{
    BusPort, Capability, GpioPort, LinePort, PulsePort, SensorPort, SharedBus, shared_bus,
};
pub use pulse::{PulseDistanceSensor, PulseTiming};
pub use scheduler::AcquisitionScheduler;
pub use sink::{LogFile, LogTarget, PersistenceSink, TickLogs};
pub use status::{RunSummary, ScheduleState, StateHandle, StopReason};
pub use types::{ImageRef, Record, SensorReading, SensorValue, Timestamp};
