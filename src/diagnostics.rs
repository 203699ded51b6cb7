use anyhow::Result;

use crate::clock::{TrustedClock, host_clock};
use crate::config::DeviceConfig;
use crate::offline::{OfflineEventQueue, OfflineState};
use crate::storage::{DirStorage, Storage};
use crate::util::format_timestamp;

const CHECK_FILE: &str = ".diagnostics-check";

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsReport {
    pub device_name: String,
    pub remote: Option<String>,
    pub child_id: Option<u64>,
    pub start_offline: bool,
    pub storage_root: String,
    pub storage_error: Option<String>,
    pub queued_events: usize,
    pub clock: Option<String>,
}

impl DiagnosticsReport {
    pub fn collect(config: &DeviceConfig, storage: &DirStorage) -> Result<Self> {
        let state = OfflineState::load(storage);
        let queue = OfflineEventQueue::new(storage.clone());
        let clock = host_clock(state.rtc_utc_offset);
        Ok(Self {
            device_name: config.device_name.clone(),
            remote: config.base_url.clone(),
            child_id: config.child_id,
            start_offline: config.start_offline,
            storage_root: storage.root().display().to_string(),
            storage_error: check_storage(storage).err().map(|err| err.to_string()),
            queued_events: queue.len()?,
            clock: clock.now().map(|now| format_timestamp(&now)),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            "BabyPod diagnostics".to_string(),
            format!("Device name: {}", self.device_name),
            format!(
                "Remote: {}",
                self.remote.as_deref().unwrap_or("not configured")
            ),
            match self.child_id {
                Some(child_id) => format!("Child id: {child_id}"),
                None => "Child id: discovered at startup".to_string(),
            },
            format!("Start offline: {}", self.start_offline),
            format!("Data directory: {}", self.storage_root),
        ];
        lines.push(match &self.storage_error {
            None => "Storage writable: yes".to_string(),
            Some(err) => format!("Storage writable: no ({err})"),
        });
        lines.push(format!("Queued events: {}", self.queued_events));
        lines.push(match &self.clock {
            Some(now) => format!("Clock: {now}"),
            None => "Clock: not plausible, set it while online".to_string(),
        });
        lines
    }
}

fn check_storage(storage: &dyn Storage) -> std::io::Result<()> {
    storage.write(CHECK_FILE, b"ok")?;
    storage.delete(CHECK_FILE)
}

pub fn run_diagnostics(config: &DeviceConfig, storage: &DirStorage) -> Result<()> {
    for line in DiagnosticsReport::collect(config, storage)?.lines() {
        println!("{line}");
    }
    Ok(())
}
