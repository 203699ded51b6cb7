use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::remote::{self, RemoteTimer};
use crate::api::Network;
use crate::clock::TrustedClock;
use crate::devices::Battery;
use crate::error::{Error, Result};
use crate::util::{Timestamp, iso8601, whole_seconds_between};

/// Timer fields as merged into request payloads.
///
/// The wire form is either `{"timer": id}` or `{"start": .., "end": ..}`;
/// queued and snapshotted forms may carry both so a stale remote id can fall
/// back to explicit timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<u64>,
    #[serde(default, with = "iso8601", skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    #[serde(default, with = "iso8601", skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl TimerPayload {
    pub fn remote(timer_id: u64) -> Self {
        Self {
            timer: Some(timer_id),
            ..Self::default()
        }
    }

    /// The form sent to the remote: a remote id wins over timestamps.
    pub fn wire(&self) -> Result<Self> {
        if let Some(timer_id) = self.timer {
            return Ok(Self::remote(timer_id));
        }
        if self.start.is_none() {
            return Err(Error::config(
                "timer payload needs a remote id or a start time",
            ));
        }
        Ok(Self {
            timer: None,
            start: self.start,
            end: self.end,
        })
    }

    /// Drops the remote id reference, leaving any explicit timestamps.
    pub fn strip_remote(&mut self) -> Option<u64> {
        self.timer.take()
    }

    pub fn to_json(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Collaborators a timer needs while starting or resuming.
pub struct TimerContext<'a> {
    pub network: Option<&'a mut dyn Network>,
    pub clock: &'a dyn TrustedClock,
    pub battery: Option<&'a mut dyn Battery>,
    /// Active timer recovered from the durable snapshot, if any.
    pub snapshot: Option<&'a Timer>,
}

/// One timed activity, backed by a remote timer id while online or by local
/// start/end timestamps while offline.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    pub name: String,
    pub offline: bool,
    pub timer_id: Option<u64>,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub resume_from_duration: u64,
    pub starting_battery_percent: Option<u8>,
}

impl Timer {
    pub fn new(name: impl Into<String>, offline: bool) -> Self {
        Self {
            name: name.into(),
            offline,
            timer_id: None,
            started_at: None,
            ended_at: None,
            resume_from_duration: 0,
            starting_battery_percent: None,
        }
    }

    pub fn from_remote(remote: &RemoteTimer) -> Self {
        let mut timer = Self::new(remote.name.clone().unwrap_or_default(), false);
        timer.timer_id = Some(remote.id);
        timer.started_at = Some(remote.start);
        timer.resume_from_duration = remote.duration_secs;
        timer
    }

    pub fn is_started(&self) -> bool {
        self.timer_id.is_some() || self.started_at.is_some()
    }

    /// Starts this timer, or adopts an existing one with the same name.
    /// Safe to call repeatedly.
    pub fn start_or_resume(&mut self, ctx: &mut TimerContext<'_>) -> Result<()> {
        let mut elapsed = 0;
        let mut adopted = false;

        if self.offline {
            if !self.is_started() {
                let snapshot = ctx
                    .snapshot
                    .filter(|snapshot| snapshot.name == self.name && snapshot.is_started());
                if let Some(snapshot) = snapshot {
                    info!("resuming offline {} timer from snapshot", self.name);
                    // The remote id, if any, travels with the snapshot.
                    self.offline = snapshot.timer_id.is_none();
                    self.timer_id = snapshot.timer_id;
                    self.started_at = snapshot.started_at;
                    self.ended_at = snapshot.ended_at;
                    adopted = true;
                } else {
                    self.started_at = Some(ctx.clock.now().ok_or(Error::ClockUnavailable)?);
                }
            }
        } else if self.timer_id.is_none() {
            let network = ctx
                .network
                .as_deref_mut()
                .ok_or_else(|| Error::config("online timers need a network"))?;
            let remote_timer = match remote::find_named_timer(network, &self.name)? {
                Some(existing) => {
                    info!("resuming remote {} timer {}", self.name, existing.id);
                    adopted = true;
                    existing
                }
                None => remote::create_timer(network, &self.name)?,
            };
            self.timer_id = Some(remote_timer.id);
            self.started_at = Some(remote_timer.start);
            elapsed = remote_timer.duration_secs;
        }

        if let (Some(started_at), Some(now)) = (self.started_at, ctx.clock.now()) {
            elapsed = whole_seconds_between(&started_at, &now);
        }

        if elapsed == 0 {
            if self.starting_battery_percent.is_none() {
                self.starting_battery_percent =
                    ctx.battery.as_deref_mut().and_then(|battery| battery.get_percent());
            }
        } else if adopted {
            self.starting_battery_percent = None;
        }

        if self.resume_from_duration == 0 && elapsed > 0 {
            self.resume_from_duration = elapsed;
        }
        debug!("started or resumed {self}");
        Ok(())
    }

    /// Deletes the remote timer; local timers have nothing to cancel.
    pub fn cancel(&mut self, network: Option<&mut dyn Network>) -> Result<()> {
        if self.offline {
            return Ok(());
        }
        let Some(timer_id) = self.timer_id else {
            return Ok(());
        };
        let network = network.ok_or_else(|| Error::config("remote timers need a network"))?;
        remote::delete_timer(network, timer_id)?;
        info!("canceled remote {} timer {timer_id}", self.name);
        Ok(())
    }

    /// Stamps `ended_at` with the current time if the timer is still open.
    pub fn stop(&mut self, clock: &dyn TrustedClock) -> Result<()> {
        if self.started_at.is_none() || self.ended_at.is_some() {
            return Ok(());
        }
        match clock.now() {
            Some(now) => {
                self.ended_at = Some(now);
                Ok(())
            }
            None if self.timer_id.is_some() => Ok(()),
            None => Err(Error::ClockUnavailable),
        }
    }

    /// Wire payload: `{"timer": id}` for remote timers, otherwise explicit
    /// start/end with `end` defaulting to now.
    pub fn as_payload(&self, clock: &dyn TrustedClock) -> Result<TimerPayload> {
        if let Some(timer_id) = self.timer_id {
            return Ok(TimerPayload::remote(timer_id));
        }
        let Some(start) = self.started_at else {
            return Err(Error::config(format!(
                "{} timer was never started or resumed",
                self.name
            )));
        };
        let end = match self.ended_at {
            Some(end) => end,
            None => clock.now().ok_or(Error::ClockUnavailable)?,
        };
        Ok(TimerPayload {
            timer: None,
            start: Some(start),
            end: Some(end),
        })
    }

    /// Everything known about the timer, for queued requests and snapshots.
    pub fn payload(&self) -> Result<TimerPayload> {
        if !self.is_started() {
            return Err(Error::config(format!(
                "{} timer was never started or resumed",
                self.name
            )));
        }
        Ok(TimerPayload {
            timer: self.timer_id,
            start: self.started_at,
            end: self.ended_at,
        })
    }

    /// Inverse of [`Timer::payload`].
    pub fn from_payload(name: &str, payload: &TimerPayload) -> Self {
        let mut timer = Self::new(name, payload.timer.is_none());
        timer.timer_id = payload.timer;
        timer.started_at = payload.start;
        timer.ended_at = payload.end;
        timer
    }

    pub fn elapsed_secs(&self, clock: &dyn TrustedClock) -> Option<u64> {
        let start = self.started_at?;
        let end = self.ended_at.or_else(|| clock.now())?;
        Some(whole_seconds_between(&start, &end))
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer \"{}\"", self.name)?;
        if let Some(timer_id) = self.timer_id {
            write!(f, " id {timer_id}")?;
        }
        if let Some(started_at) = &self.started_at {
            write!(f, " {}", crate::util::format_timestamp(started_at))?;
        }
        match &self.ended_at {
            Some(ended_at) => write!(f, " -> {}", crate::util::format_timestamp(ended_at))?,
            None => write!(f, " ongoing")?,
        }
        if self.resume_from_duration > 0 {
            write!(f, " (resume from {} sec)", self.resume_from_duration)?;
        }
        Ok(())
    }
}
