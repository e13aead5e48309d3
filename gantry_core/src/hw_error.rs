//! Maps `Box<dyn Error>` from the device boundary to a typed `SensorError`.
//!
//! The traits in `gantry_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our taxonomy, with an optional feature-gated
//! path for `gantry_hardware::HwError` downcasting.

use crate::error::SensorError;

/// Map a device-boundary error to a typed `SensorError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_device_error(e: &(dyn std::error::Error + 'static)) -> SensorError {
    #[cfg(feature = "hardware-errors")]
    {
        use gantry_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout | HwError::EdgeTimeout(_) => SensorError::Timeout,
                HwError::Gpio(msg) => SensorError::Misconfigured(msg.clone()),
                other => SensorError::DeviceBusy(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        SensorError::Timeout
    } else {
        SensorError::DeviceBusy(s)
    }
}
