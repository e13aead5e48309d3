//! Record data model shared by the assembler, correlator and sinks.
use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Local, Utc};

use crate::config::DisplayZone;

/// One sensor value. Binary inputs stay boolean all the way to the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    Number(f64),
    Flag(bool),
}

impl SensorValue {
    /// Render for persistence. Flags are written as `1`/`0`.
    pub fn render(&self, precision: usize) -> String {
        match self {
            SensorValue::Number(v) => format!("{v:.precision$}"),
            SensorValue::Flag(true) => "1".into(),
            SensorValue::Flag(false) => "0".into(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            SensorValue::Number(v) => *v,
            SensorValue::Flag(b) => f64::from(u8::from(*b)),
        }
    }
}

/// `value == None` marks a failed or unavailable read.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_id: String,
    pub value: Option<SensorValue>,
}

impl SensorReading {
    pub fn absent(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            value: None,
        }
    }
}

/// Tick instant. `mono` orders ticks; `wall` is only for display.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub mono: Instant,
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    pub fn new(mono: Instant, wall: DateTime<Utc>) -> Self {
        Self { mono, wall }
    }

    /// Render with a strftime pattern. Falls back to RFC 3339 if the
    /// pattern cannot be formatted.
    pub fn render(&self, format: &str, zone: DisplayZone) -> String {
        let mut out = String::new();
        let res = match zone {
            DisplayZone::Utc => write!(out, "{}", self.wall.format(format)),
            DisplayZone::Local => write!(out, "{}", self.wall.with_timezone(&Local).format(format)),
        };
        if res.is_err() {
            return self.wall.to_rfc3339();
        }
        out
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.mono == other.mono
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.mono.cmp(&other.mono))
    }
}

/// File name of the image captured for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tick's merged output.
#[derive(Debug, Clone)]
pub struct Record {
    pub sequence: u64,
    pub timestamp: Timestamp,
    /// Fixed configuration order.
    pub readings: Vec<SensorReading>,
    pub image_ref: Option<ImageRef>,
}

impl Record {
    pub fn absent_count(&self) -> usize {
        self.readings.iter().filter(|r| r.value.is_none()).count()
    }

    pub fn is_partial(&self) -> bool {
        self.absent_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn values_render_with_precision() {
        assert_eq!(SensorValue::Number(22.456).render(2), "22.46");
        assert_eq!(SensorValue::Number(3.0).render(0), "3");
        assert_eq!(SensorValue::Flag(true).render(2), "1");
        assert_eq!(SensorValue::Flag(false).render(2), "0");
    }

    #[test]
    fn utc_timestamp_uses_pattern() {
        let wall = Utc.with_ymd_and_hms(2024, 7, 1, 13, 5, 9).unwrap();
        let ts = Timestamp::new(Instant::now(), wall);
        assert_eq!(
            ts.render("%Y-%m-%d %H:%M:%S", DisplayZone::Utc),
            "2024-07-01 13:05:09"
        );
    }

    #[test]
    fn ordering_follows_monotonic_instant() {
        let now = Instant::now();
        let later = now + std::time::Duration::from_millis(1);
        let wall = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        // Wall clock stepped backwards; order must not care.
        let a = Timestamp::new(now, wall);
        let b = Timestamp::new(later, wall - chrono::Duration::hours(1));
        assert!(a < b);
    }

    #[test]
    fn partial_record_counts_absent_readings() {
        let rec = Record {
            sequence: 1,
            timestamp: Timestamp::new(Instant::now(), Utc::now()),
            readings: vec![
                SensorReading {
                    sensor_id: "a".into(),
                    value: Some(SensorValue::Number(1.0)),
                },
                SensorReading::absent("b"),
            ],
            image_ref: None,
        };
        assert!(rec.is_partial());
        assert_eq!(rec.absent_count(), 1);
    }
}
