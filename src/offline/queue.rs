//! Durable, file-per-event queue of writes made while offline.
//!
//! File names are `YYYYMMDDHHMMSS-NNNN.json` (UTC), so a lexicographic
//! listing is the replay order. A file is deleted only after the remote has
//! accepted it.

use std::collections::HashSet;
use std::io;

use chrono::Utc;
use log::{debug, info, warn};

use crate::api::{self, ApiRequest, Network, Record, remote};
use crate::clock::TrustedClock;
use crate::error::{Error, Result};
use crate::storage::Storage;

pub const QUEUE_DIR: &str = "queue";
const MAX_SUFFIX: u32 = 9_999;

/// What to do with one event the remote rejected during replay.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailedEventAction {
    Delete,
    Keep,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub kept: usize,
    pub deleted: usize,
}

/// A queued file and its decoded record; `record` is an error for entries
/// that no longer parse.
#[derive(Debug)]
pub struct QueuedEvent {
    pub file_name: String,
    pub record: Result<Record>,
}

pub struct OfflineEventQueue<S> {
    storage: S,
}

impl<S: Storage> OfflineEventQueue<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Durably queues `request`, returning the new file name. Only returns
    /// once the file is synced.
    pub fn add(&self, request: &ApiRequest, clock: &dyn TrustedClock) -> Result<String> {
        let record = request
            .offline_record()
            .ok_or(Error::NotSupportedOffline(request.kind()))?;
        let now = clock.now().ok_or(Error::ClockUnavailable)?;
        let stamp = now.with_timezone(&Utc).format("%Y%m%d%H%M%S").to_string();
        let bytes = serde_json::to_vec(&record.serialize_to_json()?)?;

        for suffix in 0..=MAX_SUFFIX {
            let file_name = format!("{stamp}-{suffix:04}.json");
            match self.storage.create_new(&entry_path(&file_name), &bytes) {
                Ok(()) => {
                    info!("queued {} as {file_name}", record.kind());
                    return Ok(file_name);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::QueueExhausted(stamp))
    }

    /// Queued file names in replay order.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .list(QUEUE_DIR)?
            .into_iter()
            .filter(|name| name.ends_with(".json"))
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    pub fn entries(&self) -> Result<Vec<QueuedEvent>> {
        self.list()?
            .into_iter()
            .map(|file_name| {
                let record = self.read_record(&file_name)?;
                Ok(QueuedEvent { file_name, record })
            })
            .collect()
    }

    /// Sends every queued event in order.
    ///
    /// Events the remote rejects go to `on_failed_event`, and replay moves on
    /// to the next one. A connectivity failure stops the replay with an error;
    /// everything not yet deleted stays queued for the next attempt.
    pub fn replay_all(
        &self,
        network: &mut dyn Network,
        mut on_progress: impl FnMut(usize, usize),
        mut on_failed_event: impl FnMut(Option<&Record>, &Error) -> FailedEventAction,
    ) -> Result<ReplaySummary> {
        let mut events = self.entries()?;
        let mut summary = ReplaySummary::default();
        if events.is_empty() {
            return Ok(summary);
        }

        strip_stale_timer_ids(network, &mut events)?;

        let count = events.len();
        for (index, event) in events.into_iter().enumerate() {
            on_progress(index, count);
            let outcome = match &event.record {
                Ok(record) => api::send(network, &ApiRequest::Record(record.clone())).map(|_| ()),
                Err(err) => Err(Error::payload(format!("{} is unreadable ({err})", event.file_name))),
            };

            match outcome {
                Ok(()) => {
                    self.remove(&event.file_name)?;
                    summary.replayed += 1;
                }
                Err(err) if err.is_connectivity() => {
                    warn!(
                        "replay stopped at {} of {count} ({}): {err}",
                        index + 1,
                        event.file_name
                    );
                    return Err(err);
                }
                Err(err) => match on_failed_event(event.record.as_ref().ok(), &err) {
                    FailedEventAction::Delete => {
                        warn!("dropping {} after failure: {err}", event.file_name);
                        self.remove(&event.file_name)?;
                        summary.deleted += 1;
                    }
                    FailedEventAction::Keep => {
                        warn!("keeping {} after failure: {err}", event.file_name);
                        summary.kept += 1;
                    }
                },
            }
        }

        info!(
            "replay finished: {} sent, {} kept, {} deleted",
            summary.replayed, summary.kept, summary.deleted
        );
        Ok(summary)
    }

    fn read_record(&self, file_name: &str) -> Result<Result<Record>> {
        let Some(bytes) = self.storage.read(&entry_path(file_name))? else {
            return Ok(Err(Error::payload(format!("{file_name} vanished"))));
        };
        Ok(serde_json::from_slice::<serde_json::Value>(&bytes)
            .map_err(Error::from)
            .and_then(|value| Record::deserialize_from_json(&value)))
    }

    fn remove(&self, file_name: &str) -> Result<()> {
        self.storage.delete(&entry_path(file_name))?;
        debug!("deleted queued {file_name}");
        Ok(())
    }
}

fn entry_path(file_name: &str) -> String {
    format!("{QUEUE_DIR}/{file_name}")
}

/// Drops remote timer references that no longer exist remotely, e.g. a timer
/// another client finished while this device was offline. The embedded
/// start/end timestamps are used instead.
fn strip_stale_timer_ids(network: &mut dyn Network, events: &mut [QueuedEvent]) -> Result<()> {
    let references_timer = events.iter().any(|event| {
        event
            .record
            .as_ref()
            .ok()
            .and_then(Record::timer)
            .is_some_and(|timer| timer.timer.is_some())
    });
    if !references_timer {
        return Ok(());
    }

    let active: HashSet<u64> = remote::active_timers(network)?
        .into_iter()
        .map(|timer| timer.id)
        .collect();
    for event in events {
        let Ok(record) = event.record.as_mut() else {
            continue;
        };
        let Some(timer) = record.timer_mut() else {
            continue;
        };
        if let Some(timer_id) = timer.timer
            && !active.contains(&timer_id)
        {
            timer.strip_remote();
            info!(
                "{}: remote timer {timer_id} is gone, sending explicit times",
                event.file_name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::api::Verb;
    use crate::api::testing::{FakeFailure, FakeNetwork};
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::storage::DirStorage;
    use crate::timer::Timer;
    use crate::util::parse_timestamp;

    fn queue() -> (TempDir, OfflineEventQueue<DirStorage>) {
        let dir = tempdir().expect("tempdir");
        let storage = DirStorage::open(dir.path()).expect("storage");
        (dir, OfflineEventQueue::new(storage))
    }

    fn clock() -> ManualClock {
        ManualClock::at(parse_timestamp("2025-03-04T05:06:07-05:00").expect("timestamp"))
    }

    fn change(child_id: u64) -> ApiRequest {
        Record::change(child_id, true, false, "BabyPod".to_string()).into()
    }

    fn remote_feeding(timer_id: u64) -> ApiRequest {
        let mut timer = Timer::new("feeding", false);
        timer.timer_id = Some(timer_id);
        timer.started_at = parse_timestamp("2025-03-04T09:00:00Z").ok();
        timer.ended_at = parse_timestamp("2025-03-04T09:30:00Z").ok();
        Record::feeding(1, "formula", "bottle", &timer, "BabyPod".to_string())
            .expect("feeding")
            .into()
    }

    #[test]
    fn same_second_events_get_increasing_suffixes() {
        let (_dir, queue) = queue();
        let clock = clock();
        assert_eq!(queue.add(&change(1), &clock).expect("first"), "20250304100607-0000.json");
        assert_eq!(queue.add(&change(2), &clock).expect("second"), "20250304100607-0001.json");
        clock.advance_secs(1);
        assert_eq!(queue.add(&change(3), &clock).expect("third"), "20250304100608-0000.json");
        assert_eq!(queue.len().expect("len"), 3);
    }

    #[test]
    fn queued_file_is_tagged_json() {
        let (dir, queue) = queue();
        let name = queue.add(&change(4), &clock()).expect("add");
        let text = std::fs::read_to_string(dir.path().join(QUEUE_DIR).join(name)).expect("file");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["type"], "change");
        assert_eq!(value["payload"]["child_id"], 4);
    }

    #[test]
    fn online_only_requests_are_refused() {
        let (_dir, queue) = queue();
        let err = queue
            .add(&ApiRequest::GetFirstChild, &clock())
            .expect_err("not queueable");
        assert_eq!(err.kind(), ErrorKind::NotSupportedOffline);
        assert!(queue.is_empty().expect("empty"));
    }

    #[test]
    fn enqueue_needs_a_trusted_clock() {
        let (_dir, queue) = queue();
        let err = queue.add(&change(1), &ManualClock::unset()).expect_err("no clock");
        assert_eq!(err.kind(), ErrorKind::ClockUnavailable);
    }

    #[test]
    fn replay_delivers_in_order_and_empties_queue() {
        let (_dir, queue) = queue();
        let clock = clock();
        for child_id in 1..=3 {
            queue.add(&change(child_id), &clock).expect("add");
            clock.advance_secs(1);
        }

        let mut network = FakeNetwork::default();
        let mut progress = Vec::new();
        let summary = queue
            .replay_all(
                &mut network,
                |index, count| progress.push((index, count)),
                |_, _| FailedEventAction::Keep,
            )
            .expect("replay");

        assert_eq!(summary.replayed, 3);
        assert_eq!(progress, vec![(0, 3), (1, 3), (2, 3)]);
        let children: Vec<_> = network
            .posted("changes")
            .iter()
            .map(|payload| payload["child"].clone())
            .collect();
        assert_eq!(children, vec![json!(1), json!(2), json!(3)]);
        assert!(queue.is_empty().expect("empty"));
    }

    #[test]
    fn rejected_event_follows_failure_policy() {
        let (_dir, queue) = queue();
        let clock = clock();
        queue.add(&change(1), &clock).expect("add");
        queue.add(&change(2), &clock).expect("add");
        queue.add(&change(3), &clock).expect("add");

        let mut network = FakeNetwork::default();
        network.fail(Verb::Post, "changes", FakeFailure::Status(400));
        network.fail(Verb::Post, "changes", FakeFailure::Status(500));
        let mut failures = Vec::new();
        let summary = queue
            .replay_all(&mut network, |_, _| {}, |record, err| {
                failures.push((record.map(Record::kind), err.status_code()));
                if err.status_code() == Some(400) {
                    FailedEventAction::Delete
                } else {
                    FailedEventAction::Keep
                }
            })
            .expect("replay");

        assert_eq!(
            summary,
            ReplaySummary {
                replayed: 1,
                kept: 1,
                deleted: 1
            }
        );
        assert_eq!(failures, vec![(Some("change"), Some(400)), (Some("change"), Some(500))]);
        assert_eq!(queue.list().expect("list"), vec!["20250304100607-0001.json"]);
    }

    #[test]
    fn connectivity_loss_aborts_and_resumes_where_it_stopped() {
        let (_dir, queue) = queue();
        let clock = clock();
        for child_id in 1..=4 {
            queue.add(&change(child_id), &clock).expect("add");
        }

        let mut network = FakeNetwork::default();
        network.go_down_after(2);
        let err = queue
            .replay_all(&mut network, |_, _| {}, |_, _| FailedEventAction::Delete)
            .expect_err("network dropped");
        assert!(err.is_connectivity());
        assert_eq!(queue.len().expect("len"), 2);

        let mut network = FakeNetwork::default();
        queue
            .replay_all(&mut network, |_, _| {}, |_, _| FailedEventAction::Keep)
            .expect("resume");
        let children: Vec<_> = network
            .posted("changes")
            .iter()
            .map(|payload| payload["child"].clone())
            .collect();
        assert_eq!(children, vec![json!(3), json!(4)]);
    }

    #[test]
    fn stale_remote_timer_falls_back_to_explicit_times() {
        let (_dir, queue) = queue();
        let clock = clock();
        queue.add(&remote_feeding(7), &clock).expect("stale");
        queue.add(&remote_feeding(8), &clock).expect("live");

        let mut network = FakeNetwork::default();
        network.respond(
            Verb::Get,
            "timers",
            json!({"count": 1, "results": [
                {"id": 8, "name": "feeding", "start": "2025-03-04T09:00:00Z", "duration": "0:30:00"}
            ]}),
        );
        queue
            .replay_all(&mut network, |_, _| {}, |_, _| FailedEventAction::Keep)
            .expect("replay");

        let feedings = network.posted("feedings");
        assert!(feedings[0].get("timer").is_none());
        assert_eq!(feedings[0]["start"], "2025-03-04T09:00:00+00:00");
        assert_eq!(feedings[0]["end"], "2025-03-04T09:30:00+00:00");
        assert_eq!(feedings[1]["timer"], 8);
        assert!(feedings[1].get("start").is_none());
    }

    #[test]
    fn timers_are_not_fetched_without_references() {
        let (_dir, queue) = queue();
        queue.add(&change(1), &clock()).expect("add");
        let mut network = FakeNetwork::default();
        queue
            .replay_all(&mut network, |_, _| {}, |_, _| FailedEventAction::Keep)
            .expect("replay");
        assert!(network.sent().iter().all(|request| request.uri != "timers"));
    }

    #[test]
    fn corrupt_entry_is_offered_to_failure_policy() {
        let (_dir, queue) = queue();
        queue
            .storage()
            .create_new("queue/20250101000000-0000.json", b"{not json")
            .expect("corrupt");
        let mut network = FakeNetwork::default();
        let mut offered = Vec::new();
        let summary = queue
            .replay_all(&mut network, |_, _| {}, |record, err| {
                offered.push((record.is_none(), err.kind()));
                FailedEventAction::Delete
            })
            .expect("replay");
        assert_eq!(offered, vec![(true, ErrorKind::Payload)]);
        assert_eq!(summary.deleted, 1);
        assert!(network.sent().is_empty());
    }
}
