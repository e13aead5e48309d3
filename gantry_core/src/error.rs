use thiserror::Error;

/// Per-sensor read failure. Contained at the assembler boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("sensor misconfigured: {0}")]
    Misconfigured(String),
}

impl SensorError {
    /// Misconfiguration aborts the run; everything else is retried next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SensorError::Misconfigured(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageCaptureError {
    #[error("image capture failed: {0}")]
    Capture(String),
    #[error("image store failed: {0}")]
    Store(String),
}

/// Run-level failures surfaced to the operator.
#[derive(Debug, Error, Clone)]
pub enum AcqError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("sensor {sensor} misconfigured: {reason}")]
    SensorMisconfigured { sensor: String, reason: String },
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("no sensor ports configured")]
    NoSensors,
    #[error("duplicate sensor id {0:?}")]
    DuplicateSensorId(String),
    #[error("missing sensor log")]
    MissingSensorLog,
    #[error("missing image log")]
    MissingImageLog,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
