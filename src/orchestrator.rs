//! Headless device flow: decides between the remote and the offline queue,
//! and keeps the durable snapshot in step with every change.

use log::{info, warn};

use crate::api::{self, ApiRequest, Network, Record, compose_notes, remote};
use crate::clock::{ClockSync, TimeSource, TrustedClock};
use crate::config::DeviceConfig;
use crate::devices::{Battery, SharedBattery, SharedUi, Tone, UiCommand};
use crate::error::{Error, ErrorKind, Result};
use crate::offline::{FailedEventAction, OfflineEventQueue, OfflineState, ReplaySummary};
use crate::storage::Storage;
use crate::timer::{Timer, TimerContext};
use crate::util::{Timestamp, whole_seconds_between};

const FALLBACK_CHILD_ID: u64 = 1;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CommitOutcome {
    Sent,
    /// Written to the offline queue under this file name.
    Queued(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RtcSyncReason {
    Forced,
    Implausible,
    Stale,
}

pub struct Orchestrator<S> {
    config: DeviceConfig,
    storage: S,
    state: OfflineState,
    queue: Option<OfflineEventQueue<S>>,
    network: Option<Box<dyn Network>>,
    clock: Box<dyn TrustedClock>,
    battery: Option<SharedBattery>,
    ui: SharedUi,
    offline: bool,
    child_id: u64,
}

impl<S: Storage + Clone> Orchestrator<S> {
    /// Loads the durable snapshot from `storage` and queues offline writes
    /// under it.
    pub fn new(
        config: DeviceConfig,
        storage: S,
        clock: Box<dyn TrustedClock>,
        ui: SharedUi,
    ) -> Self {
        let state = OfflineState::load(&storage);
        Self::from_state(config, storage, state, clock, ui)
    }

    /// Like [`Orchestrator::new`] with a snapshot the caller already loaded.
    pub fn from_state(
        config: DeviceConfig,
        storage: S,
        state: OfflineState,
        clock: Box<dyn TrustedClock>,
        ui: SharedUi,
    ) -> Self {
        let offline = config.start_offline;
        let child_id = config.child_id.unwrap_or(FALLBACK_CHILD_ID);
        Self {
            queue: Some(OfflineEventQueue::new(storage.clone())),
            config,
            storage,
            state,
            network: None,
            clock,
            battery: None,
            ui,
            offline,
            child_id,
        }
    }

    pub fn with_network(mut self, network: Box<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_battery(mut self, battery: SharedBattery) -> Self {
        self.battery = Some(battery);
        self
    }

    /// Drops the offline queue, e.g. when durable storage failed to mount.
    pub fn without_queue(mut self) -> Self {
        self.queue = None;
        self
    }
}

impl<S: Storage> Orchestrator<S> {
    pub fn is_offline(&self) -> bool {
        self.offline || self.network.is_none()
    }

    pub fn state(&self) -> &OfflineState {
        &self.state
    }

    pub fn queue(&self) -> Option<&OfflineEventQueue<S>> {
        self.queue.as_ref()
    }

    pub fn clock(&self) -> &dyn TrustedClock {
        self.clock.as_ref()
    }

    pub fn child_id(&self) -> u64 {
        self.child_id
    }

    pub fn go_offline(&mut self) {
        if !self.offline {
            info!("switching to offline mode");
        }
        self.offline = true;
    }

    fn save_state(&self) -> Result<()> {
        self.state.save(&self.storage)
    }

    fn online_network(&mut self) -> Option<&mut dyn Network> {
        if self.offline {
            return None;
        }
        let network: &mut dyn Network = self.network.as_deref_mut()?;
        Some(network)
    }

    fn ui(&self, command: UiCommand) {
        self.ui.borrow_mut().send(command);
    }

    /// Starts `name`, or resumes `existing` when given. The result becomes
    /// the crash-recovery snapshot.
    pub fn start_or_resume_timer(&mut self, name: &str, existing: Option<Timer>) -> Result<Timer> {
        let offline = self.is_offline();
        let mut timer = existing.unwrap_or_else(|| Timer::new(name, offline));
        let snapshot = self.state.active_timer.clone();
        {
            let network: Option<&mut dyn Network> = match self.network.as_deref_mut() {
                Some(network) if !offline => Some(network),
                _ => None,
            };
            let mut battery_guard = self.battery.as_ref().map(|battery| battery.borrow_mut());
            let battery: Option<&mut dyn Battery> = match battery_guard.as_deref_mut() {
                Some(battery) => Some(battery),
                None => None,
            };
            timer.start_or_resume(&mut TimerContext {
                network,
                clock: self.clock.as_ref(),
                battery,
                snapshot: snapshot.as_ref(),
            })?;
        }
        self.state.set_active_timer(Some(&timer));
        self.save_state()?;
        Ok(timer)
    }

    /// Cancels `timer` and forgets the snapshot.
    pub fn cancel_timer(&mut self, timer: &mut Timer) -> Result<()> {
        if self.is_offline() && !timer.offline {
            warn!("offline, leaving remote {} timer to expire", timer.name);
        } else {
            timer.cancel(self.online_network())?;
        }
        self.state.set_active_timer(None);
        self.save_state()
    }

    /// The notes for a finished activity: the device name, `extra` lines and
    /// the battery spent while `timer` ran.
    pub fn notes_for(&self, timer: Option<&Timer>, extra: &[String]) -> String {
        let starting = timer.and_then(|timer| timer.starting_battery_percent);
        let ending = match (starting, &self.battery) {
            (Some(_), Some(battery)) => battery.borrow_mut().get_percent(),
            _ => None,
        };
        compose_notes(&self.config.device_name, extra, starting, ending)
    }

    /// Sends `request` now, or queues it while offline. Online failures fall
    /// back to the queue when there is one.
    pub fn commit(&mut self, mut request: ApiRequest) -> Result<CommitOutcome> {
        self.close_embedded_timer(&mut request)?;
        let feeding = match request.offline_record() {
            Some(Record::Feeding(feeding)) => Some((feeding.timer.start, feeding.method.clone())),
            _ => None,
        };

        let outcome = if self.is_offline() {
            CommitOutcome::Queued(self.commit_offline(request)?)
        } else {
            let sent = match self.online_network() {
                Some(network) => api::send(network, &request).map(|_| ()),
                None => Err(Error::config("no network configured")),
            };
            match sent {
                Ok(()) => CommitOutcome::Sent,
                Err(err)
                    if (err.is_connectivity() || err.kind() == ErrorKind::RequestFailed)
                        && self.queue.is_some()
                        && request.offline_record().is_some() =>
                {
                    warn!("{} failed ({err}), queueing offline", request.kind());
                    self.go_offline();
                    CommitOutcome::Queued(self.commit_offline(request)?)
                }
                Err(err) => return Err(err),
            }
        };

        self.state.set_active_timer(None);
        if let Some((start, method)) = feeding {
            self.state.last_feeding = start.or(self.state.last_feeding);
            self.state.last_feeding_method = Some(method);
        }
        self.save_state()?;
        Ok(outcome)
    }

    /// Ends any embedded open timer at the current time and queues the
    /// request.
    pub fn commit_offline(&mut self, mut request: ApiRequest) -> Result<String> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(Error::NotSupportedOffline(request.kind()));
        };
        self.close_embedded_timer(&mut request)?;
        queue.add(&request, self.clock.as_ref())
    }

    /// Ends an open embedded timer at the current time. A remote id is kept
    /// next to the timestamps so a stale id can still be replayed.
    fn close_embedded_timer(&self, request: &mut ApiRequest) -> Result<()> {
        let Some(record) = request.record_mut() else {
            return Ok(());
        };
        let Some(mut timer) = record.embedded_timer() else {
            return Ok(());
        };
        let closed = if timer.timer_id.is_some() {
            timer.stop(self.clock.as_ref())?;
            timer.payload()?
        } else {
            timer.as_payload(self.clock.as_ref())?
        };
        if let Some(payload) = record.timer_mut() {
            *payload = closed;
        }
        Ok(())
    }

    /// Leaves offline mode and replays the queue. Any failure puts the
    /// device back offline.
    pub fn back_online(
        &mut self,
        on_failed_event: impl FnMut(Option<&Record>, &Error) -> FailedEventAction,
    ) -> Result<ReplaySummary> {
        self.offline = false;
        let ui = self.ui.clone();
        let result = match (self.network.as_deref_mut(), self.queue.as_ref()) {
            (None, _) => Err(Error::config("no network configured")),
            (Some(_), None) => Ok(ReplaySummary::default()),
            (Some(network), Some(queue)) => queue.replay_all(
                network,
                |index, count| ui.borrow_mut().send(UiCommand::Progress { index, count }),
                on_failed_event,
            ),
        };
        match result {
            Ok(summary) => {
                info!("back online");
                Ok(summary)
            }
            Err(err) => {
                warn!("could not go back online: {err}");
                self.go_offline();
                Err(err)
            }
        }
    }

    /// A timer left running by a previous session or another client.
    pub fn check_for_running_timer(&mut self) -> Option<Timer> {
        let Some(network) = self.online_network() else {
            return self.state.active_timer.clone();
        };
        match remote::active_timers(network) {
            Ok(timers) => timers.first().map(Timer::from_remote),
            Err(err) => {
                warn!("unable to look for running timers: {err}");
                None
            }
        }
    }

    pub fn rtc_sync_reason(&self, force: bool) -> Option<RtcSyncReason> {
        if force {
            return Some(RtcSyncReason::Forced);
        }
        let Some(now) = self.clock.now() else {
            return Some(RtcSyncReason::Implausible);
        };
        if self.is_offline() {
            return None;
        }
        let last_set = self.state.last_rtc_set?;
        (whole_seconds_between(&last_set, &now) > self.config.rtc_refresh_interval_secs)
            .then_some(RtcSyncReason::Stale)
    }

    pub fn sync_clock(&mut self, source: &mut dyn TimeSource) -> Result<ClockSync> {
        if self.is_offline() {
            return Err(Error::config(
                "the clock must be set while online, before going offline",
            ));
        }
        let sync = self.clock.sync(source)?;
        self.state.last_rtc_set = Some(sync.synced_at);
        self.state.rtc_utc_offset = Some(sync.utc_offset_hours);
        self.save_state()?;
        Ok(sync)
    }

    /// Shows a pending message of the day, at most once per check interval.
    pub fn check_motd(&mut self) -> Option<String> {
        if self.is_offline() {
            return None;
        }
        let now = self.clock.now();
        let due = match (self.state.last_motd_check, now) {
            (None, _) => true,
            (Some(last), Some(now)) => {
                whole_seconds_between(&last, &now) >= self.config.motd_check_interval_secs
            }
            (Some(_), None) => false,
        };
        if !due {
            return None;
        }

        let network = self.online_network()?;
        let motd = match remote::consume_motd(network) {
            Ok(motd) => motd,
            Err(err) => {
                warn!("message of the day check failed: {err}");
                return None;
            }
        };
        self.state.last_motd_check = now;
        if let Err(err) = self.save_state() {
            warn!("unable to persist motd check: {err}");
        }
        if let Some(text) = &motd {
            self.ui(UiCommand::Tone(Tone::Motd));
            self.ui(UiCommand::Message(text.clone()));
        }
        motd
    }

    /// Most recent feeding: from the remote while online, else the snapshot.
    pub fn refresh_last_feeding(&mut self) -> Option<(Timestamp, Option<String>)> {
        let child_id = self.child_id;
        if let Some(network) = self.online_network() {
            match remote::last_feeding(network, child_id) {
                Ok(Some((start, method))) => {
                    if self.state.last_feeding != Some(start)
                        || self.state.last_feeding_method != method
                    {
                        self.state.last_feeding = Some(start);
                        self.state.last_feeding_method = method;
                        if let Err(err) = self.save_state() {
                            warn!("unable to persist last feeding: {err}");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("unable to fetch last feeding: {err}"),
            }
        }
        let last = self.state.last_feeding?;
        Some((last, self.state.last_feeding_method.clone()))
    }

    pub fn init_child_id(&mut self) -> u64 {
        if let Some(child_id) = self.config.child_id {
            self.child_id = child_id;
            return child_id;
        }
        let discovered = match self.online_network() {
            Some(network) => remote::first_child_id(network),
            None => Err(Error::NotSupportedOffline("get_first_child")),
        };
        self.child_id = match discovered {
            Ok(child_id) => child_id,
            Err(err) => {
                warn!("unable to discover child ({err}), using {FALLBACK_CHILD_ID}");
                FALLBACK_CHILD_ID
            }
        };
        self.child_id
    }

    /// Warns when the battery is low and not charging.
    pub fn check_battery(&mut self) -> Option<u8> {
        let (percent, charging) = {
            let mut battery = self.battery.as_ref()?.borrow_mut();
            (battery.get_percent()?, battery.is_charging())
        };
        if percent <= self.config.low_battery_percent && !charging {
            self.ui(UiCommand::Tone(Tone::LowBattery));
            self.ui(UiCommand::Message(format!("Low battery: {percent}%")));
        }
        Some(percent)
    }
}
