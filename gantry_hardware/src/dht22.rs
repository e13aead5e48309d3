//! DHT22 temperature/humidity sensor on a dedicated single-wire line.
//!
//! One conversation yields both quantities, and the part needs two seconds
//! between conversations. Both channel ports on a pin share one `Dht22` and
//! reuse its frame inside that window.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gantry_traits::{DeviceError, LineSensor};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

/// Minimum spacing between two conversations with the device.
pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dht22Frame {
    pub humidity_pct: f64,
    pub temperature_c: f64,
}

/// Decode the 5-byte frame: humidity(16) temperature(16, sign in bit 15) checksum(8).
pub fn decode_frame(bytes: [u8; 5]) -> Result<Dht22Frame> {
    let sum = bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != bytes[4] {
        return Err(HwError::Checksum {
            got: bytes[4],
            expected: sum,
        });
    }
    let humidity = u16::from_be_bytes([bytes[0], bytes[1]]);
    let magnitude = u16::from_be_bytes([bytes[2] & 0x7F, bytes[3]]);
    let mut temperature_c = f64::from(magnitude) / 10.0;
    if bytes[2] & 0x80 != 0 {
        temperature_c = -temperature_c;
    }
    Ok(Dht22Frame {
        humidity_pct: f64::from(humidity) / 10.0,
        temperature_c,
    })
}

/// Source of raw frames; the GPIO bit-banger in hardware builds.
pub trait FrameSource: Send {
    fn fetch(&mut self, timeout: Duration) -> Result<[u8; 5]>;
}

pub struct Dht22<S> {
    source: S,
    last: Option<(Instant, Dht22Frame)>,
    last_attempt: Option<Instant>,
}

impl<S: FrameSource> Dht22<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last: None,
            last_attempt: None,
        }
    }

    /// Latest frame, talking to the device only when the minimum interval has passed.
    pub fn frame(&mut self, timeout: Duration) -> Result<Dht22Frame> {
        let now = Instant::now();
        if let Some(prev) = self.last_attempt
            && now.saturating_duration_since(prev) < MIN_INTERVAL
        {
            return match self.last {
                Some((at, frame)) if now.saturating_duration_since(at) < MIN_INTERVAL => {
                    let age = now.saturating_duration_since(at);
                    debug!(age_ms = age.as_millis() as u64, "dht22 serving cached frame");
                    Ok(frame)
                }
                _ => Err(HwError::NotReady("dht22 inside minimum interval".into())),
            };
        }
        self.last_attempt = Some(now);
        let bytes = self.source.fetch(timeout)?;
        let frame = decode_frame(bytes)?;
        trace!(?frame, "dht22 frame");
        self.last = Some((now, frame));
        Ok(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dht22Channel {
    Temperature,
    Humidity,
}

/// One column of a shared DHT22.
pub struct Dht22Port<S> {
    device: Arc<Mutex<Dht22<S>>>,
    channel: Dht22Channel,
}

impl<S: FrameSource> Dht22Port<S> {
    pub fn new(device: Arc<Mutex<Dht22<S>>>, channel: Dht22Channel) -> Self {
        Self { device, channel }
    }
}

impl<S: FrameSource> LineSensor for Dht22Port<S> {
    fn read(&mut self, timeout: Duration) -> std::result::Result<f64, DeviceError> {
        let mut dev = self
            .device
            .lock()
            .map_err(|_| HwError::NotReady("dht22 lock poisoned".into()))?;
        let frame = dev.frame(timeout).inspect_err(|e| {
            debug!(error = %e, channel = ?self.channel, "dht22 read failed");
        })?;
        Ok(match self.channel {
            Dht22Channel::Temperature => frame.temperature_c,
            Dht22Channel::Humidity => frame.humidity_pct,
        })
    }
}

#[cfg(feature = "hardware")]
pub use gpio_source::GpioFrameSource;

#[cfg(feature = "hardware")]
mod gpio_source {
    use std::time::{Duration, Instant};

    use rppal::gpio::{Gpio, IoPin, Mode, PullUpDown};

    use super::FrameSource;
    use crate::error::{HwError, Result};
    use crate::util::wait_for_level;

    const START_LOW: Duration = Duration::from_millis(2);
    const EDGE_TIMEOUT: Duration = Duration::from_micros(200);
    /// High pulses longer than this encode a one bit (zero ~27us, one ~70us).
    const ONE_THRESHOLD: Duration = Duration::from_micros(50);

    pub struct GpioFrameSource {
        pin: IoPin,
    }

    impl GpioFrameSource {
        pub fn open(bcm_pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let mut pin = gpio
                .get(bcm_pin)
                .map_err(|e| HwError::Gpio(format!("dht22 pin {bcm_pin}: {e}")))?
                .into_io(Mode::Input);
            pin.set_pullupdown(PullUpDown::PullUp);
            Ok(Self { pin })
        }
    }

    impl FrameSource for GpioFrameSource {
        fn fetch(&mut self, timeout: Duration) -> Result<[u8; 5]> {
            let deadline = Instant::now() + timeout;

            self.pin.set_mode(Mode::Output);
            self.pin.set_low();
            std::thread::sleep(START_LOW);
            self.pin.set_mode(Mode::Input);

            let pin = &self.pin;
            wait_for_level(|| pin.is_high(), false, EDGE_TIMEOUT, Duration::ZERO, "response")?;
            wait_for_level(|| pin.is_high(), true, EDGE_TIMEOUT, Duration::ZERO, "response")?;
            wait_for_level(|| pin.is_high(), false, EDGE_TIMEOUT, Duration::ZERO, "preamble")?;

            let mut bytes = [0u8; 5];
            for bit in 0..40 {
                let rise =
                    wait_for_level(|| pin.is_high(), true, EDGE_TIMEOUT, Duration::ZERO, "bit")?;
                let fall =
                    wait_for_level(|| pin.is_high(), false, EDGE_TIMEOUT, Duration::ZERO, "bit")?;
                if fall.saturating_duration_since(rise) > ONE_THRESHOLD {
                    bytes[bit / 8] |= 0x80 >> (bit % 8);
                }
                if Instant::now() >= deadline {
                    return Err(HwError::Timeout);
                }
            }
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Frames(Vec<[u8; 5]>, usize);

    impl FrameSource for Frames {
        fn fetch(&mut self, _timeout: Duration) -> Result<[u8; 5]> {
            let f = self.0[self.1 % self.0.len()];
            self.1 += 1;
            Ok(f)
        }
    }

    #[test]
    fn decodes_positive_and_negative_temperatures() {
        // 65.2 %RH, 35.1 C
        let f = decode_frame([0x02, 0x8C, 0x01, 0x5F, 0xEE]).unwrap();
        assert!((f.humidity_pct - 65.2).abs() < 1e-9);
        assert!((f.temperature_c - 35.1).abs() < 1e-9);

        // -10.1 C
        let f = decode_frame([0x02, 0x8C, 0x80, 0x65, 0x73]).unwrap();
        assert!((f.temperature_c + 10.1).abs() < 1e-9);
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let err = decode_frame([0x02, 0x8C, 0x01, 0x5F, 0x00]).unwrap_err();
        assert!(matches!(err, HwError::Checksum { got: 0x00, expected: 0xEE }));
    }

    #[test]
    fn channels_share_one_conversation() {
        let source = Frames(vec![[0x02, 0x8C, 0x01, 0x5F, 0xEE]], 0);
        let dev = Arc::new(Mutex::new(Dht22::new(source)));
        let mut t = Dht22Port::new(dev.clone(), Dht22Channel::Temperature);
        let mut h = Dht22Port::new(dev.clone(), Dht22Channel::Humidity);

        let timeout = Duration::from_millis(10);
        assert!((t.read(timeout).unwrap() - 35.1).abs() < 1e-9);
        assert!((h.read(timeout).unwrap() - 65.2).abs() < 1e-9);
        assert_eq!(dev.lock().unwrap().source.1, 1);
    }

    #[test]
    fn cached_frame_is_served_inside_minimum_interval() {
        // The second frame would read 35.2 C if the device were asked again.
        let source = Frames(
            vec![[0x02, 0x8C, 0x01, 0x5F, 0xEE], [0x02, 0x8C, 0x01, 0x60, 0xEF]],
            0,
        );
        let mut dev = Dht22::new(source);
        let timeout = Duration::from_millis(10);
        let first = dev.frame(timeout).unwrap();
        let second = dev.frame(timeout).unwrap();
        assert_eq!(first, second);
        assert_eq!(dev.source.1, 1);
    }

    #[test]
    fn failed_conversation_is_not_retried_inside_interval() {
        let source = Frames(vec![[0x02, 0x8C, 0x01, 0x5F, 0x00]], 0);
        let mut dev = Dht22::new(source);
        let timeout = Duration::from_millis(10);
        assert!(matches!(dev.frame(timeout), Err(HwError::Checksum { .. })));
        assert!(matches!(dev.frame(timeout), Err(HwError::NotReady(_))));
        assert_eq!(dev.source.1, 1);
    }
}
