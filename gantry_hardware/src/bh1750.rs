//! BH1750 ambient light sensor on a shared I2C bus.
use std::time::Duration;

use gantry_traits::{Bus, BusSensor, DeviceError};
use tracing::trace;

use crate::error::HwError;

pub const DEFAULT_ADDRESS: u16 = 0x23;

const POWER_ON: u8 = 0x01;
const CONTINUOUS_HIGH_RES: u8 = 0x10;
/// Counts per lux at the default measurement time.
const COUNTS_PER_LUX: f64 = 1.2;

pub struct Bh1750 {
    address: u16,
}

impl Bh1750 {
    pub fn new(address: u16) -> Self {
        Self { address }
    }
}

impl Default for Bh1750 {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

/// Convert the two measurement bytes (MSB first) to lux.
pub fn lux_from_bytes(buf: [u8; 2]) -> f64 {
    f64::from(u16::from_be_bytes(buf)) / COUNTS_PER_LUX
}

impl BusSensor for Bh1750 {
    fn address(&self) -> u16 {
        self.address
    }

    fn open(&mut self, bus: &mut dyn Bus) -> Result<(), DeviceError> {
        bus.write(self.address, &[POWER_ON])?;
        bus.write(self.address, &[CONTINUOUS_HIGH_RES])?;
        Ok(())
    }

    fn read(&mut self, bus: &mut dyn Bus, _timeout: Duration) -> Result<f64, DeviceError> {
        let mut buf = [0u8; 2];
        bus.read(self.address, &mut buf)
            .map_err(|e| HwError::I2c(format!("bh1750@{:#04x}: {e}", self.address)))?;
        let lux = lux_from_bytes(buf);
        trace!(address = self.address, raw = ?buf, lux, "bh1750 read");
        Ok(lux)
    }
}
