//! Device-boundary traits for the gantry acquisition pipeline.
//!
//! Drivers live behind these traits so the pipeline never speaks raw bus
//! protocol and can be exercised end to end with simulated devices.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

/// Error type crossing the device boundary.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;

/// A device with its own dedicated signal line(s), e.g. a DHT22.
pub trait LineSensor {
    /// Acquire the line and prepare the device. Called once at startup.
    fn open(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Take one reading, giving up after `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<f64, DeviceError>;
}

/// A shared two-wire bus (I2C/SMBus style). Not reentrant: callers must hold
/// exclusive access for the duration of a transaction.
pub trait Bus {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DeviceError>;
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write_read(
        &mut self,
        address: u16,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), DeviceError>;
}

/// A device reached through a shared [`Bus`] at a fixed address.
pub trait BusSensor {
    fn address(&self) -> u16;

    /// One-time device setup (mode registers etc.).
    fn open(&mut self, _bus: &mut dyn Bus) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read(&mut self, bus: &mut dyn Bus, timeout: Duration) -> Result<f64, DeviceError>;
}

/// A digital input line.
pub trait InputLine {
    fn is_high(&mut self) -> Result<bool, DeviceError>;
}

/// A digital output line.
pub trait OutputLine {
    fn set_high(&mut self) -> Result<(), DeviceError>;
    fn set_low(&mut self) -> Result<(), DeviceError>;
}

/// Still-image capture device. Returns the encoded image bytes.
pub trait Camera {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError>;
}

impl<T: LineSensor + ?Sized> LineSensor for Box<T> {
    fn open(&mut self) -> Result<(), DeviceError> {
        (**self).open()
    }

    fn read(&mut self, timeout: Duration) -> Result<f64, DeviceError> {
        (**self).read(timeout)
    }
}

impl<T: Bus + ?Sized> Bus for Box<T> {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<(), DeviceError> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read(address, buf)
    }

    fn write_read(
        &mut self,
        address: u16,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), DeviceError> {
        (**self).write_read(address, bytes, buf)
    }
}

impl<T: BusSensor + ?Sized> BusSensor for Box<T> {
    fn address(&self) -> u16 {
        (**self).address()
    }

    fn open(&mut self, bus: &mut dyn Bus) -> Result<(), DeviceError> {
        (**self).open(bus)
    }

    fn read(&mut self, bus: &mut dyn Bus, timeout: Duration) -> Result<f64, DeviceError> {
        (**self).read(bus, timeout)
    }
}

impl<T: InputLine + ?Sized> InputLine for Box<T> {
    fn is_high(&mut self) -> Result<bool, DeviceError> {
        (**self).is_high()
    }
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn set_high(&mut self) -> Result<(), DeviceError> {
        (**self).set_high()
    }

    fn set_low(&mut self) -> Result<(), DeviceError> {
        (**self).set_low()
    }
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn capture(&mut self) -> Result<Vec<u8>, DeviceError> {
        (**self).capture()
    }
}
