//! Trusted wall clock. The value may be unset or implausible, so every read
//! is an `Option`.

use std::cell::Cell;
use std::rc::Rc;

use chrono::{Datelike, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone};
use log::{info, warn};

use crate::error::{Error, HardwareError, Result};
use crate::util::{Timestamp, format_timestamp};

pub const MIN_PLAUSIBLE_YEAR: i32 = 2024;
pub const MAX_PLAUSIBLE_YEAR: i32 = 2050;

pub trait TrustedClock {
    fn now(&self) -> Option<Timestamp>;
    fn sync(&mut self, source: &mut dyn TimeSource) -> Result<ClockSync>;
}

/// Authoritative time used to set the clock.
pub trait TimeSource {
    fn fetch(&mut self) -> Result<Timestamp>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSync {
    pub synced_at: Timestamp,
    pub utc_offset_hours: f64,
}

/// Battery-backed real-time clock chip; it only knows local wall time.
pub trait RtcDevice {
    fn read(&self) -> Result<NaiveDateTime, HardwareError>;
    fn write(&mut self, local: NaiveDateTime) -> Result<(), HardwareError>;
}

pub struct RtcClock<D> {
    device: D,
    utc_offset_hours: Option<f64>,
}

impl<D: RtcDevice> RtcClock<D> {
    pub fn new(device: D, utc_offset_hours: Option<f64>) -> Self {
        Self {
            device,
            utc_offset_hours,
        }
    }

    pub fn utc_offset_hours(&self) -> Option<f64> {
        self.utc_offset_hours
    }
}

impl<D: RtcDevice> TrustedClock for RtcClock<D> {
    fn now(&self) -> Option<Timestamp> {
        let offset = offset_from_hours(self.utc_offset_hours?)?;
        let local = match self.device.read() {
            Ok(local) => local,
            Err(err) => {
                warn!("RTC read failed: {err}");
                return None;
            }
        };
        if !is_plausible_year(local.year()) {
            return None;
        }
        offset.from_local_datetime(&local).single()
    }

    fn sync(&mut self, source: &mut dyn TimeSource) -> Result<ClockSync> {
        let authoritative = source.fetch()?;
        self.device
            .write(authoritative.naive_local())
            .map_err(|err| Error::HardwareUnavailable {
                device: "rtc",
                attempts: 1,
                detail: err.to_string(),
            })?;
        let utc_offset_hours = f64::from(authoritative.offset().local_minus_utc()) / 3_600.0;
        self.utc_offset_hours = Some(utc_offset_hours);
        info!(
            "RTC set to {} (UTC offset {utc_offset_hours:+})",
            format_timestamp(&authoritative)
        );
        Ok(ClockSync {
            synced_at: authoritative,
            utc_offset_hours,
        })
    }
}

pub fn is_plausible_year(year: i32) -> bool {
    (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(&year)
}

pub fn offset_from_hours(hours: f64) -> Option<FixedOffset> {
    if !hours.is_finite() {
        return None;
    }
    FixedOffset::east_opt((hours * 3_600.0).round() as i32)
}

/// Host stand-in for the RTC chip: the system clock plus a settable skew.
#[derive(Debug, Clone)]
pub struct SystemRtc {
    skew: TimeDelta,
}

impl Default for SystemRtc {
    fn default() -> Self {
        Self {
            skew: TimeDelta::zero(),
        }
    }
}

impl RtcDevice for SystemRtc {
    fn read(&self) -> Result<NaiveDateTime, HardwareError> {
        Ok(Local::now().naive_local() + self.skew)
    }

    fn write(&mut self, local: NaiveDateTime) -> Result<(), HardwareError> {
        self.skew = local - Local::now().naive_local();
        Ok(())
    }
}

/// Host clock: the system RTC with the persisted offset, or the system's
/// own offset when none was recorded yet.
pub fn host_clock(utc_offset_hours: Option<f64>) -> RtcClock<SystemRtc> {
    let offset = utc_offset_hours
        .unwrap_or_else(|| f64::from(Local::now().offset().local_minus_utc()) / 3_600.0);
    RtcClock::new(SystemRtc::default(), Some(offset))
}

/// Settable clock for simulations and tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Option<Timestamp>>>,
}

impl ManualClock {
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Rc::new(Cell::new(Some(now))),
        }
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Option<Timestamp>) {
        self.now.set(now);
    }

    pub fn advance_secs(&self, secs: i64) {
        if let Some(now) = self.now.get() {
            self.now.set(Some(now + TimeDelta::seconds(secs)));
        }
    }
}

impl TrustedClock for ManualClock {
    fn now(&self) -> Option<Timestamp> {
        self.now.get()
    }

    fn sync(&mut self, source: &mut dyn TimeSource) -> Result<ClockSync> {
        let authoritative = source.fetch()?;
        self.now.set(Some(authoritative));
        Ok(ClockSync {
            synced_at: authoritative,
            utc_offset_hours: f64::from(authoritative.offset().local_minus_utc()) / 3_600.0,
        })
    }
}
