use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::error::HardwareError;

pub trait Battery {
    /// Charge in percent, or `None` while the gauge has no plausible reading.
    fn get_percent(&mut self) -> Option<u8>;
    fn is_charging(&mut self) -> bool;
}

pub type SharedBattery = Rc<RefCell<dyn Battery>>;

/// Raw fuel gauge readings as reported by the chip driver.
pub trait FuelGauge {
    fn cell_percent(&mut self) -> Result<Option<f32>, HardwareError>;
    /// Percent per hour; positive while charging.
    fn charge_rate(&mut self) -> Result<f32, HardwareError>;
}

pub struct BatteryMonitor<G> {
    gauge: G,
    last_percent: Option<u8>,
}

impl<G: FuelGauge> BatteryMonitor<G> {
    pub fn new(gauge: G) -> Self {
        Self {
            gauge,
            last_percent: None,
        }
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }
}

impl<G: FuelGauge> Battery for BatteryMonitor<G> {
    fn get_percent(&mut self) -> Option<u8> {
        self.last_percent = match self.gauge.cell_percent() {
            Ok(Some(raw)) => normalize_percent(raw),
            Ok(None) => {
                debug!("battery gauge has no reading yet");
                None
            }
            Err(err) => {
                warn!("battery gauge read failed: {err}");
                None
            }
        };
        self.last_percent
    }

    fn is_charging(&mut self) -> bool {
        match self.gauge.charge_rate() {
            Ok(rate) => rate > 0.0,
            Err(err) => {
                warn!("battery charge rate read failed: {err}");
                false
            }
        }
    }
}

fn normalize_percent(raw: f32) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    let clamped = raw.clamp(0.0, 100.0).round() as u8;
    if clamped == 0 {
        debug!("battery percent {raw} is implausible; hiding until it stabilizes");
        return None;
    }
    Some(clamped)
}
