//! rppal-backed GPIO lines and I2C bus.
use std::time::Duration;

use gantry_traits::{Bus, DeviceError, InputLine, OutputLine};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::i2c::I2c;
use tracing::debug;

use crate::error::{HwError, Result};
use crate::util::adapter_timeout_ms;

pub struct PiInput {
    pin: InputPin,
}

impl PiInput {
    pub fn open(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| HwError::Gpio(format!("input pin {bcm_pin}: {e}")))?
            .into_input();
        debug!(pin = bcm_pin, "gpio input acquired");
        Ok(Self { pin })
    }
}

impl InputLine for PiInput {
    fn is_high(&mut self) -> std::result::Result<bool, DeviceError> {
        Ok(self.pin.is_high())
    }
}

pub struct PiOutput {
    pin: OutputPin,
}

impl PiOutput {
    pub fn open(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut pin = gpio
            .get(bcm_pin)
            .map_err(|e| HwError::Gpio(format!("output pin {bcm_pin}: {e}")))?
            .into_output();
        pin.set_low(); // trigger idles low
        debug!(pin = bcm_pin, "gpio output acquired");
        Ok(Self { pin })
    }
}

impl OutputLine for PiOutput {
    fn set_high(&mut self) -> std::result::Result<(), DeviceError> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> std::result::Result<(), DeviceError> {
        self.pin.set_low();
        Ok(())
    }
}

/// The Pi's hardware I2C controller. Opened once and held for the process lifetime.
pub struct PiBus {
    i2c: I2c,
    current: Option<u16>,
}

impl PiBus {
    /// Open `bus` with every transaction bounded by `timeout`.
    pub fn open(bus: u8, timeout: Duration) -> Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(|e| HwError::I2c(format!("open bus {bus}: {e}")))?;
        let timeout_ms = adapter_timeout_ms(timeout);
        i2c.set_timeout(timeout_ms)
            .map_err(|e| HwError::I2c(format!("bus {bus} timeout: {e}")))?;
        debug!(bus, timeout_ms, "i2c bus opened");
        Ok(Self { i2c, current: None })
    }

    fn select(&mut self, address: u16) -> Result<()> {
        if self.current != Some(address) {
            self.i2c
                .set_slave_address(address)
                .map_err(|e| HwError::I2c(format!("select {address:#04x}: {e}")))?;
            self.current = Some(address);
        }
        Ok(())
    }
}

impl Bus for PiBus {
    fn write(&mut self, address: u16, bytes: &[u8]) -> std::result::Result<(), DeviceError> {
        self.select(address)?;
        self.i2c
            .write(bytes)
            .map_err(|e| HwError::I2c(format!("write {address:#04x}: {e}")))?;
        Ok(())
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> std::result::Result<(), DeviceError> {
        self.select(address)?;
        self.i2c
            .read(buf)
            .map_err(|e| HwError::I2c(format!("read {address:#04x}: {e}")))?;
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u16,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> std::result::Result<(), DeviceError> {
        self.select(address)?;
        self.i2c
            .write_read(bytes, buf)
            .map_err(|e| HwError::I2c(format!("write_read {address:#04x}: {e}")))?;
        Ok(())
    }
}
