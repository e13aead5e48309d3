//! `From` implementations bridging `gantry_config` types to `gantry_core` types.

use std::time::Duration;

use crate::config::{DisplayZone, ReadMode, RowFormat, RunCfg, Timeouts};
use crate::image::ImageNaming;

// ── RunCfg ───────────────────────────────────────────────────────────────────

impl From<&gantry_config::RunCfg> for RunCfg {
    fn from(c: &gantry_config::RunCfg) -> Self {
        Self {
            duration: (c.duration_s > 0).then(|| Duration::from_secs(c.duration_s)),
            period: Duration::from_millis(c.period_ms),
            max_ticks: c.max_ticks,
        }
    }
}

impl From<gantry_config::ReadMode> for ReadMode {
    fn from(m: gantry_config::ReadMode) -> Self {
        match m {
            gantry_config::ReadMode::Sequential => ReadMode::Sequential,
            gantry_config::ReadMode::Concurrent => ReadMode::Concurrent,
        }
    }
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

impl From<&gantry_config::Timeouts> for Timeouts {
    fn from(c: &gantry_config::Timeouts) -> Self {
        Self {
            sensor: Duration::from_millis(c.sensor_ms),
            echo_rise: Duration::from_millis(c.echo_rise_ms),
            echo_fall: Duration::from_millis(c.echo_fall_ms),
            echo_poll: Duration::from_micros(c.echo_poll_us),
        }
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

impl From<gantry_config::TimeZoneCfg> for DisplayZone {
    fn from(z: gantry_config::TimeZoneCfg) -> Self {
        match z {
            gantry_config::TimeZoneCfg::Local => DisplayZone::Local,
            gantry_config::TimeZoneCfg::Utc => DisplayZone::Utc,
        }
    }
}

impl From<&gantry_config::OutputCfg> for RowFormat {
    fn from(c: &gantry_config::OutputCfg) -> Self {
        Self {
            sentinel: c.sentinel.clone(),
            timestamp_format: c.timestamp_format.clone(),
            zone: c.timezone.into(),
            precision: c.precision,
        }
    }
}

// ── Camera ───────────────────────────────────────────────────────────────────

impl From<&gantry_config::CameraCfg> for ImageNaming {
    fn from(c: &gantry_config::CameraCfg) -> Self {
        Self {
            prefix: c.file_prefix.clone(),
            digits: c.digits,
            extension: c.extension.clone(),
        }
    }
}
