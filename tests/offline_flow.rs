use std::cell::RefCell;
use std::rc::Rc;

use babypod::api::testing::{FakeFailure, FakeNetwork};
use babypod::api::{ApiRequest, Record, Verb};
use babypod::clock::ManualClock;
use babypod::config::DeviceConfig;
use babypod::devices::RecordingUi;
use babypod::offline::{FailedEventAction, OfflineEventQueue, OfflineState};
use babypod::orchestrator::{CommitOutcome, Orchestrator};
use babypod::storage::DirStorage;
use babypod::timer::Timer;
use babypod::util::parse_timestamp;
use serde_json::Value;
use tempfile::{TempDir, tempdir};

struct Device {
    _dir: TempDir,
    storage: DirStorage,
    clock: ManualClock,
    network: Rc<RefCell<FakeNetwork>>,
}

impl Device {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let storage = DirStorage::open(dir.path().join("data")).expect("storage");
        Self {
            _dir: dir,
            storage,
            clock: ManualClock::at(parse_timestamp("2025-06-10T02:15:00-04:00").expect("ts")),
            network: Rc::new(RefCell::new(FakeNetwork::default())),
        }
    }

    /// A fresh boot: everything but the storage root and the RTC is rebuilt.
    fn boot(&self) -> Orchestrator<DirStorage> {
        Orchestrator::new(
            DeviceConfig {
                start_offline: true,
                child_id: Some(2),
                ..DeviceConfig::default()
            },
            self.storage.clone(),
            Box::new(self.clock.clone()),
            Rc::new(RefCell::new(RecordingUi::default())),
        )
        .with_network(Box::new(self.network.clone()))
    }

    fn queue(&self) -> OfflineEventQueue<DirStorage> {
        OfflineEventQueue::new(self.storage.clone())
    }
}

fn feeding(device: &Orchestrator<DirStorage>, timer: &Timer, side: &str) -> ApiRequest {
    let notes = device.notes_for(Some(timer), &[side.to_string()]);
    Record::feeding(device.child_id(), "breast milk", side, timer, notes)
        .expect("feeding")
        .into()
}

fn posted_notes(network: &FakeNetwork, uri: &str) -> Vec<String> {
    network
        .posted(uri)
        .into_iter()
        .filter_map(|payload| payload.get("notes").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[test]
fn feeding_timer_survives_power_loss() {
    let device = Device::new();
    let started_at = {
        let mut orchestrator = device.boot();
        let timer = orchestrator
            .start_or_resume_timer("feeding", None)
            .expect("start");
        device.clock.advance_secs(420);
        timer.started_at
    };
    assert!(started_at.is_some());

    device.clock.advance_secs(30);
    let state = OfflineState::load(&device.storage);
    assert_eq!(state.active_timer_name.as_deref(), Some("feeding"));

    let mut orchestrator = device.boot();
    let running = orchestrator
        .check_for_running_timer()
        .expect("snapshot timer");
    assert_eq!(running.started_at, started_at);

    let resumed = orchestrator
        .start_or_resume_timer("feeding", Some(running))
        .expect("resume");
    assert_eq!(resumed.started_at, started_at);
    assert_eq!(resumed.elapsed_secs(&device.clock), Some(450));
}

#[test]
fn rejected_feeding_is_kept_and_the_next_one_delivered() {
    let device = Device::new();
    let mut orchestrator = device.boot();

    let mut queued = Vec::new();
    for side in ["left breast", "right breast"] {
        let timer = orchestrator
            .start_or_resume_timer("feeding", None)
            .expect("start");
        device.clock.advance_secs(5);
        let outcome = orchestrator
            .commit(feeding(&orchestrator, &timer, side))
            .expect("commit");
        let CommitOutcome::Queued(file_name) = outcome else {
            panic!("offline commits are queued");
        };
        queued.push(file_name);
    }
    assert_eq!(device.queue().list().expect("list"), queued);

    device
        .network
        .borrow_mut()
        .fail(Verb::Post, "feedings", FakeFailure::Status(400));
    let mut rejected = Vec::new();
    let summary = orchestrator
        .back_online(|record, err| {
            rejected.push((record.and_then(Record::notes).map(str::to_string), err.status_code()));
            FailedEventAction::Keep
        })
        .expect("replay");

    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.kept, 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].1, Some(400));
    assert!(rejected[0].0.as_deref().is_some_and(|notes| notes.contains("left breast")));

    let network = device.network.borrow();
    assert_eq!(network.posted("feedings").len(), 2);
    let delivered = network.posted("feedings")[1];
    assert_eq!(delivered.get("method").and_then(Value::as_str), Some("right breast"));
    assert_eq!(device.queue().list().expect("list"), vec![queued[0].clone()]);
}

#[test]
fn interrupted_replay_resumes_without_redelivery() {
    let device = Device::new();
    let mut orchestrator = device.boot();
    for index in 0..4 {
        orchestrator
            .commit(Record::change(2, true, index % 2 == 0, format!("change {index}")).into())
            .expect("queue");
        device.clock.advance_secs(1);
    }

    device.network.borrow_mut().go_down_after(2);
    let err = orchestrator
        .back_online(|_, _| FailedEventAction::Keep)
        .expect_err("network dropped");
    assert!(err.is_connectivity());
    assert!(orchestrator.is_offline());
    assert_eq!(device.queue().len().expect("len"), 2);

    device.network.borrow_mut().restore();
    let summary = orchestrator
        .back_online(|_, _| FailedEventAction::Keep)
        .expect("replay");
    assert_eq!(summary.replayed, 2);
    assert!(device.queue().is_empty().expect("empty"));

    // "change 2" was attempted when the link dropped, so it is sent twice.
    let network = device.network.borrow();
    assert_eq!(
        posted_notes(&network, "changes"),
        vec!["change 0", "change 1", "change 2", "change 2", "change 3"]
    );
}
