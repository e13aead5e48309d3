#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and replay-series parsing for the acquisition pipeline.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Replay CSV loader enforces headers so a mis-exported series is caught
//!   at startup instead of producing a silently shifted column.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Read every port inline, in configuration order.
    #[default]
    Sequential,
    /// Read independent devices on worker threads and join per tick.
    Concurrent,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunCfg {
    /// Total run length in seconds; 0 runs until interrupted.
    pub duration_s: u64,
    pub period_ms: u64,
    /// Optional hard cap on persisted ticks.
    pub max_ticks: Option<u64>,
    pub mode: ReadMode,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self {
            duration_s: 60,
            period_ms: 1000,
            max_ticks: None,
            mode: ReadMode::Sequential,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneCfg {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputCfg {
    pub sensor_log: PathBuf,
    pub image_log: PathBuf,
    /// Where captured image bytes are stored; images are only referenced when unset.
    pub image_dir: Option<PathBuf>,
    /// Token written in place of an absent reading.
    pub sentinel: String,
    /// chrono strftime pattern for the Timestamp column.
    pub timestamp_format: String,
    pub timezone: TimeZoneCfg,
    /// Decimal places for numeric readings.
    pub precision: usize,
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            sensor_log: PathBuf::from("logs/sensor_log.csv"),
            image_log: PathBuf::from("logs/image_log.csv"),
            image_dir: None,
            sentinel: "N/A".into(),
            timestamp_format: "%Y-%m-%d %H:%M:%S".into(),
            timezone: TimeZoneCfg::Local,
            precision: 2,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Per-read timeout (ms). Also accepts alias "sample_ms".
    #[serde(alias = "sample_ms")]
    pub sensor_ms: u64,
    /// Max wait for the ultrasonic echo to rise after the trigger pulse.
    pub echo_rise_ms: u64,
    /// Max echo pulse width before the measurement is abandoned.
    pub echo_fall_ms: u64,
    /// Echo polling interval; 0 spins.
    pub echo_poll_us: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sensor_ms: 250,
            echo_rise_ms: 25,
            echo_fall_ms: 40,
            echo_poll_us: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BusCfg {
    /// I2C controller number (`/dev/i2c-N`).
    pub id: u8,
}

impl Default for BusCfg {
    fn default() -> Self {
        Self { id: 1 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    Sim,
    Command,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraCfg {
    pub enabled: bool,
    pub backend: CameraBackend,
    pub command: String,
    pub args: Vec<String>,
    pub file_prefix: String,
    /// Zero-padded width of the sequence number in file names.
    pub digits: usize,
    pub extension: String,
    pub timeout_ms: u64,
}

impl Default for CameraCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CameraBackend::Sim,
            command: "rpicam-still".into(),
            args: ["-n", "-t", "1", "-e", "jpg", "-o", "-"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            file_prefix: "image_".into(),
            digits: 4,
            extension: "jpg".into(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Dht22,
    Bh1750,
    Mlx90614,
    SoilMoisture,
    Ultrasonic,
}

impl SensorKind {
    pub fn is_bus_addressed(self) -> bool {
        matches!(self, SensorKind::Bh1750 | SensorKind::Mlx90614)
    }

    pub fn default_address(self) -> Option<u16> {
        match self {
            SensorKind::Bh1750 => Some(0x23),
            SensorKind::Mlx90614 => Some(0x5A),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Temperature,
    Humidity,
    Ambient,
    Object,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimFault {
    Timeout,
    #[default]
    Busy,
}

/// Simulation strategy for a sensor in hardware-free builds.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SimCfg {
    /// First value; defaults per sensor kind when unset.
    pub start: Option<f64>,
    /// Added per read.
    pub step: Option<f64>,
    /// Recorded series (`tick,value` CSV) used instead of start/step.
    pub replay: Option<PathBuf>,
    /// 1-based reads that fail.
    pub fail_ticks: Vec<u64>,
    pub fault: SimFault,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorCfg {
    /// Column header in the sensor log.
    pub id: String,
    pub kind: SensorKind,
    pub pin: Option<u8>,
    pub address: Option<u16>,
    pub trigger_pin: Option<u8>,
    pub echo_pin: Option<u8>,
    pub channel: Option<Channel>,
    #[serde(default)]
    pub active_low: bool,
    pub sim: Option<SimCfg>,
}

impl SensorCfg {
    /// Configured bus address, or the part's factory default.
    pub fn bus_address(&self) -> Option<u16> {
        self.address.or_else(|| self.kind.default_address())
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunCfg,
    #[serde(default)]
    pub output: OutputCfg,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub bus: BusCfg,
    #[serde(default)]
    pub camera: CameraCfg,
    #[serde(default)]
    pub logging: Logging,
    pub sensors: Vec<SensorCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// One row of a replay series.
#[derive(Debug, Deserialize)]
struct ReplayRow {
    tick: u64,
    value: String,
}

/// Load a recorded series for a simulated sensor.
///
/// Expected headers:
/// tick,value
///
/// Ticks must be strictly increasing. An empty value or `N/A` is a failed read.
pub fn load_replay_csv(path: &Path) -> eyre::Result<Vec<Option<f64>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open replay CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["tick", "value"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "replay CSV must have headers 'tick,value', got: {}",
            actual.join(",")
        );
    }

    let mut series = Vec::new();
    let mut last_tick: Option<u64> = None;
    for (idx, rec) in rdr.deserialize::<ReplayRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if let Some(prev) = last_tick
            && row.tick <= prev
        {
            eyre::bail!(
                "replay ticks must be strictly increasing (row {}: {} after {})",
                idx + 2,
                row.tick,
                prev
            );
        }
        last_tick = Some(row.tick);
        let v = row.value.as_str();
        if v.is_empty() || v.eq_ignore_ascii_case("n/a") {
            series.push(None);
        } else {
            let parsed = v
                .parse::<f64>()
                .map_err(|e| eyre::eyre!("invalid CSV row {}: value {:?}: {}", idx + 2, v, e))?;
            series.push(Some(parsed));
        }
    }
    if series.is_empty() {
        eyre::bail!("replay CSV {:?} has no rows", path);
    }
    Ok(series)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Run
        if self.run.period_ms == 0 {
            eyre::bail!("run.period_ms must be > 0");
        }
        if self.run.max_ticks == Some(0) {
            eyre::bail!("run.max_ticks must be >= 1 when set");
        }

        // Output
        if self.output.sentinel.is_empty() {
            eyre::bail!("output.sentinel must not be empty");
        }
        if self.output.timestamp_format.is_empty() {
            eyre::bail!("output.timestamp_format must not be empty");
        }
        if self.output.precision > 9 {
            eyre::bail!("output.precision must be in [0, 9]");
        }
        if self.output.sensor_log == self.output.image_log {
            eyre::bail!("output.sensor_log and output.image_log must be different files");
        }

        // Timeouts
        if self.timeouts.sensor_ms == 0 {
            eyre::bail!("timeouts.sensor_ms must be >= 1");
        }
        if self.timeouts.echo_rise_ms == 0 || self.timeouts.echo_fall_ms == 0 {
            eyre::bail!("timeouts.echo_rise_ms and timeouts.echo_fall_ms must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly (got {r:?})");
        }

        // Camera
        if !(1..=12).contains(&self.camera.digits) {
            eyre::bail!("camera.digits must be in [1, 12]");
        }
        if self.camera.enabled && self.camera.backend == CameraBackend::Command {
            if self.camera.command.trim().is_empty() {
                eyre::bail!("camera.command must be set for the command backend");
            }
            if self.camera.timeout_ms == 0 {
                eyre::bail!("camera.timeout_ms must be >= 1");
            }
        }

        // Sensors
        if self.sensors.is_empty() {
            eyre::bail!("at least one [[sensors]] entry is required");
        }
        let mut ids = HashSet::new();
        // GPIO pin -> owning device. Two dht22 channels on one pin share a device.
        let mut pins: HashMap<u8, String> = HashMap::new();
        let mut claim = |pin: u8, owner: String| -> eyre::Result<()> {
            match pins.get(&pin) {
                Some(prev) if *prev != owner => {
                    eyre::bail!("gpio pin {pin} is claimed by both {prev} and {owner}")
                }
                _ => {
                    pins.insert(pin, owner);
                    Ok(())
                }
            }
        };

        for s in &self.sensors {
            if s.id.trim().is_empty() {
                eyre::bail!("sensor id must not be empty");
            }
            if !ids.insert(s.id.as_str()) {
                eyre::bail!("duplicate sensor id {:?}", s.id);
            }
            match s.kind {
                SensorKind::Dht22 => {
                    let pin = s
                        .pin
                        .ok_or_else(|| eyre::eyre!("sensor {:?}: dht22 pin missing", s.id))?;
                    if !matches!(s.channel, Some(Channel::Temperature | Channel::Humidity)) {
                        eyre::bail!(
                            "sensor {:?}: dht22 channel must be temperature or humidity",
                            s.id
                        );
                    }
                    claim(pin, format!("dht22 on pin {pin}"))?;
                }
                SensorKind::Bh1750 | SensorKind::Mlx90614 => {
                    let addr = s.bus_address().unwrap_or(0);
                    if !(0x03..=0x77).contains(&addr) {
                        eyre::bail!("sensor {:?}: bus address {addr:#04x} out of range", s.id);
                    }
                    if s.kind == SensorKind::Mlx90614
                        && !matches!(s.channel, Some(Channel::Ambient | Channel::Object))
                    {
                        eyre::bail!(
                            "sensor {:?}: mlx90614 channel must be ambient or object",
                            s.id
                        );
                    }
                }
                SensorKind::SoilMoisture => {
                    let pin = s.pin.ok_or_else(|| {
                        eyre::eyre!("sensor {:?}: soil_moisture pin missing", s.id)
                    })?;
                    claim(pin, format!("sensor {:?}", s.id))?;
                }
                SensorKind::Ultrasonic => {
                    let (Some(trig), Some(echo)) = (s.trigger_pin, s.echo_pin) else {
                        eyre::bail!("sensor {:?}: ultrasonic needs trigger_pin and echo_pin", s.id);
                    };
                    if trig == echo {
                        eyre::bail!("sensor {:?}: trigger_pin and echo_pin must differ", s.id);
                    }
                    claim(trig, format!("sensor {:?}", s.id))?;
                    claim(echo, format!("sensor {:?}", s.id))?;
                }
            }
            if let Some(sim) = &s.sim
                && [sim.start, sim.step].iter().flatten().any(|v| !v.is_finite())
            {
                eyre::bail!("sensor {:?}: sim.start and sim.step must be finite", s.id);
            }
        }

        Ok(())
    }
}
