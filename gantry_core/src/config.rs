//! Runtime configuration for the acquisition pipeline.
//!
//! Separate from the TOML-deserialized config in `gantry_config`; see
//! `conversions` for the bridge.
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};

use crate::error::BuildError;

/// Scheduler pacing.
#[derive(Debug, Clone)]
pub struct RunCfg {
    /// `None` runs until the termination flag is raised.
    pub duration: Option<Duration>,
    pub period: Duration,
    pub max_ticks: Option<u64>,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            duration: Some(Duration::from_secs(60)),
            period: Duration::from_millis(1000),
            max_ticks: None,
        }
    }
}

/// Read timeouts.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Per-read deadline for every port.
    pub sensor: Duration,
    pub echo_rise: Duration,
    pub echo_fall: Duration,
    /// Echo line polling interval; zero spins.
    pub echo_poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sensor: Duration::from_millis(250),
            echo_rise: Duration::from_millis(25),
            echo_fall: Duration::from_millis(40),
            echo_poll: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    #[default]
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayZone {
    #[default]
    Local,
    Utc,
}

/// How a record is turned into log rows.
#[derive(Debug, Clone)]
pub struct RowFormat {
    pub sentinel: String,
    pub timestamp_format: String,
    pub zone: DisplayZone,
    pub precision: usize,
}

impl Default for RowFormat {
    fn default() -> Self {
        Self {
            sentinel: "N/A".into(),
            timestamp_format: "%Y-%m-%d %H:%M:%S".into(),
            zone: DisplayZone::Local,
            precision: 2,
        }
    }
}

impl RowFormat {
    /// Reject formats that would fail at render time.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.sentinel.is_empty() {
            return Err(BuildError::InvalidConfig("sentinel must not be empty"));
        }
        if self.precision > 9 {
            return Err(BuildError::InvalidConfig("precision must be <= 9"));
        }
        if self.timestamp_format.is_empty()
            || StrftimeItems::new(&self.timestamp_format).any(|i| matches!(i, Item::Error))
        {
            return Err(BuildError::InvalidConfig("invalid timestamp_format"));
        }
        Ok(())
    }
}
