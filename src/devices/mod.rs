pub mod battery;
pub mod ui;

use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::{Error, HardwareError, Result};

pub use battery::{Battery, BatteryMonitor, FuelGauge, SharedBattery};
pub use ui::{Backlight, RecordingUi, SharedUi, Tone, Ui, UiCommand};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `op` until it stops reporting `NotReady`, sleeping `policy.delay`
/// between attempts.
pub fn retry_hardware<T>(
    device: &'static str,
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<T, HardwareError>,
) -> Result<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(HardwareError::NotReady) if attempts < max_attempts => {
                warn!("{device} not ready (attempt {attempts} of {max_attempts}), retrying");
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            Err(err) => {
                return Err(Error::HardwareUnavailable {
                    device,
                    attempts,
                    detail: err.to_string(),
                });
            }
        }
    }
}
