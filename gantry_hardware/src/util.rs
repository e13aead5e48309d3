use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Wait until `is_high` reports `level`, or `timeout` expires.
///
/// Returns the instant at which the level was first observed. A zero
/// `poll_interval` spins instead of sleeping, for edges that are only a few
/// tens of microseconds apart.
pub fn wait_for_level(
    mut is_high: impl FnMut() -> bool,
    level: bool,
    timeout: Duration,
    poll_interval: Duration,
    edge: &'static str,
) -> Result<Instant> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if is_high() == level {
            return Ok(now);
        }
        if now >= deadline {
            return Err(HwError::EdgeTimeout(edge));
        }
        if poll_interval.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(poll_interval);
        }
    }
}

/// Kernel I2C adapter timeout in milliseconds for a per-read `timeout`.
///
/// The adapter counts in 10 ms steps, so this rounds up and never returns 0.
pub fn adapter_timeout_ms(timeout: Duration) -> u32 {
    let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    ms.div_ceil(10).max(1).saturating_mul(10)
}

/// Run `child` to completion, killing it once `timeout` has elapsed.
pub fn wait_child_with_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
}
