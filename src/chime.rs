//! Elapsed-time policies deciding when an audio cue is due while a timer
//! runs. Callers poll from a tick listener and pass the current monotonic
//! time in.

use std::time::Duration;

use crate::error::{Error, Result};

pub trait PeriodicChime {
    /// Resets both the total-elapsed and last-chime origins to `now`.
    fn start(&mut self, now: Duration);

    /// Returns true (and records the chime) when a cue is due at `now`.
    fn chime_if_needed(&mut self, now: Duration) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
struct ChimeClock {
    started_at: Duration,
    last_chime: Duration,
}

impl ChimeClock {
    fn restart(&mut self, now: Duration) {
        self.started_at = now;
        self.last_chime = now;
    }

    fn total_elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.started_at)
    }

    fn since_last_chime(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_chime)
    }
}

fn require_positive(name: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct ConsistentIntervalPeriodicChime {
    interval: Duration,
    clock: ChimeClock,
}

impl ConsistentIntervalPeriodicChime {
    pub fn new(interval: Duration) -> Result<Self> {
        Ok(Self {
            interval: require_positive("chime interval", interval)?,
            clock: ChimeClock::default(),
        })
    }

    fn is_due(&self, now: Duration) -> bool {
        self.clock.since_last_chime(now) >= self.interval
    }
}

impl PeriodicChime for ConsistentIntervalPeriodicChime {
    fn start(&mut self, now: Duration) {
        self.clock.restart(now);
    }

    fn chime_if_needed(&mut self, now: Duration) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.clock.last_chime = now;
        true
    }
}

/// Chimes every `interval` until `escalate_after` has elapsed in total, then
/// every `escalated_interval` counted on the total elapsed time.
#[derive(Debug, Clone)]
pub struct EscalatingIntervalPeriodicChime {
    base: ConsistentIntervalPeriodicChime,
    escalate_after: Duration,
    escalated_interval: Duration,
    last_escalated_chime: Duration,
}

impl EscalatingIntervalPeriodicChime {
    pub fn new(
        interval: Duration,
        escalate_after: Duration,
        escalated_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base: ConsistentIntervalPeriodicChime::new(interval)?,
            escalate_after,
            escalated_interval: require_positive("escalated chime interval", escalated_interval)?,
            last_escalated_chime: escalate_after,
        })
    }

    fn is_escalated_due(&mut self, total: Duration) -> bool {
        if total < self.escalate_after {
            return false;
        }
        if total.saturating_sub(self.last_escalated_chime) < self.escalated_interval {
            return false;
        }
        self.last_escalated_chime = total;
        true
    }
}

impl PeriodicChime for EscalatingIntervalPeriodicChime {
    fn start(&mut self, now: Duration) {
        self.base.start(now);
        self.last_escalated_chime = self.escalate_after;
    }

    fn chime_if_needed(&mut self, now: Duration) -> bool {
        let total = self.base.clock.total_elapsed(now);
        let due = self.base.is_due(now) || self.is_escalated_due(total);
        if due {
            self.base.clock.last_chime = now;
        }
        due
    }
}

/// Chime policy for a logical timer name, if that activity chimes at all.
pub fn chime_for_timer(name: &str) -> Result<Option<Box<dyn PeriodicChime>>> {
    let minutes = |value: u64| Duration::from_secs(value * 60);
    let chime: Option<Box<dyn PeriodicChime>> = match name {
        "feeding" => Some(Box::new(EscalatingIntervalPeriodicChime::new(
            minutes(15),
            minutes(30),
            minutes(1),
        )?)),
        "pumping" => Some(Box::new(ConsistentIntervalPeriodicChime::new(minutes(5))?)),
        "tummy_time" => Some(Box::new(ConsistentIntervalPeriodicChime::new(minutes(1))?)),
        _ => None,
    };
    Ok(chime)
}
