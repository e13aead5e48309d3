//! MLX90614 infrared thermometer (SMBus word reads).
use std::time::Duration;

use gantry_traits::{Bus, BusSensor, DeviceError};
use tracing::trace;

use crate::error::HwError;

pub const DEFAULT_ADDRESS: u16 = 0x5A;

const REG_AMBIENT: u8 = 0x06;
const REG_OBJECT: u8 = 0x07;
const KELVIN_PER_COUNT: f64 = 0.02;
const ZERO_CELSIUS_K: f64 = 273.15;
const ERROR_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrChannel {
    Ambient,
    Object,
}

impl IrChannel {
    fn register(self) -> u8 {
        match self {
            IrChannel::Ambient => REG_AMBIENT,
            IrChannel::Object => REG_OBJECT,
        }
    }
}

pub struct Mlx90614 {
    address: u16,
    channel: IrChannel,
}

impl Mlx90614 {
    pub fn new(address: u16, channel: IrChannel) -> Self {
        Self { address, channel }
    }
}

/// Decode a RAM temperature word (LSB, MSB; PEC ignored) into degrees Celsius.
pub fn celsius_from_word(lo: u8, hi: u8) -> Result<f64, HwError> {
    let raw = u16::from_le_bytes([lo, hi]);
    if raw & ERROR_FLAG != 0 {
        return Err(HwError::NotReady(format!("mlx90614 error flag set ({raw:#06x})")));
    }
    Ok(f64::from(raw) * KELVIN_PER_COUNT - ZERO_CELSIUS_K)
}

impl BusSensor for Mlx90614 {
    fn address(&self) -> u16 {
        self.address
    }

    fn read(&mut self, bus: &mut dyn Bus, _timeout: Duration) -> Result<f64, DeviceError> {
        let mut buf = [0u8; 3];
        bus.write_read(self.address, &[self.channel.register()], &mut buf)
            .map_err(|e| HwError::I2c(format!("mlx90614@{:#04x}: {e}", self.address)))?;
        let c = celsius_from_word(buf[0], buf[1])?;
        trace!(address = self.address, channel = ?self.channel, celsius = c, "mlx90614 read");
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_room_temperature() {
        // 22.5 C = 295.65 K = 14782.5 counts -> 14783 (0x39BF)
        let c = celsius_from_word(0xBF, 0x39).unwrap();
        assert!((c - 22.51).abs() < 0.02, "got {c}");
    }

    #[test]
    fn error_flag_is_rejected() {
        let err = celsius_from_word(0x00, 0x80).unwrap_err();
        assert!(matches!(err, HwError::NotReady(_)));
    }
}
