//! Typed helpers over the raw [`Network`] for the lookups the device makes.

use log::{debug, info};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::requests::MOTD_TAG;
use crate::api::{ApiRequest, Network, send};
use crate::error::{Error, Result};
use crate::util::{Timestamp, duration_to_seconds, parse_timestamp};

/// A timer as reported by the remote system.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTimer {
    pub id: u64,
    pub name: Option<String>,
    pub start: Timestamp,
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
struct TimerBody {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    start: String,
    #[serde(default)]
    duration: Option<String>,
}

impl TryFrom<TimerBody> for RemoteTimer {
    type Error = Error;

    fn try_from(body: TimerBody) -> Result<Self> {
        Ok(Self {
            id: body.id,
            name: body.name,
            start: parse_timestamp(&body.start)?,
            duration_secs: match body.duration.as_deref() {
                Some(duration) => duration_to_seconds(duration)?,
                None => 0,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct FeedingBody {
    start: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct NoteBody {
    id: u64,
    #[serde(default)]
    note: String,
}

fn body(request: &ApiRequest, response: Option<Value>) -> Result<Value> {
    response.ok_or_else(|| Error::payload(format!("{} returned no body", request.kind())))
}

fn decode<T: DeserializeOwned>(request: &ApiRequest, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| Error::payload(format!("unexpected {} response: {err}", request.kind())))
}

fn fetch<T: DeserializeOwned>(network: &mut dyn Network, request: &ApiRequest) -> Result<T> {
    let response = send(network, request)?;
    decode(request, body(request, response)?)
}

pub fn find_named_timer(network: &mut dyn Network, name: &str) -> Result<Option<RemoteTimer>> {
    let request = ApiRequest::GetNamedTimer {
        name: name.to_string(),
    };
    let page: Page<TimerBody> = fetch(network, &request)?;
    page.results
        .into_iter()
        .next()
        .map(RemoteTimer::try_from)
        .transpose()
}

pub fn create_timer(network: &mut dyn Network, name: &str) -> Result<RemoteTimer> {
    let request = ApiRequest::CreateTimer {
        name: name.to_string(),
    };
    let timer: TimerBody = fetch(network, &request)?;
    let timer = RemoteTimer::try_from(timer)?;
    info!("created remote {name} timer {}", timer.id);
    Ok(timer)
}

pub fn delete_timer(network: &mut dyn Network, timer_id: u64) -> Result<()> {
    send(network, &ApiRequest::DeleteTimer { timer_id })?;
    Ok(())
}

/// Every running remote timer that carries a name.
pub fn active_timers(network: &mut dyn Network) -> Result<Vec<RemoteTimer>> {
    let request = ApiRequest::GetAllTimers {
        tag: None,
        limit: None,
    };
    let page: Page<TimerBody> = fetch(network, &request)?;
    page.results
        .into_iter()
        .filter(|timer| timer.name.as_deref().is_some_and(|name| !name.is_empty()))
        .map(RemoteTimer::try_from)
        .collect()
}

/// Start time and method of the most recent feeding, if any was logged.
pub fn last_feeding(
    network: &mut dyn Network,
    child_id: u64,
) -> Result<Option<(Timestamp, Option<String>)>> {
    let request = ApiRequest::GetLastFeeding { child_id };
    let page: Page<FeedingBody> = fetch(network, &request)?;
    if page.count == 0 {
        return Ok(None);
    }
    let Some(feeding) = page.results.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some((parse_timestamp(&feeding.start)?, feeding.method)))
}

pub fn first_child_id(network: &mut dyn Network) -> Result<u64> {
    let page: Page<IdBody> = fetch(network, &ApiRequest::GetFirstChild)?;
    page.results
        .first()
        .map(|child| child.id)
        .ok_or_else(|| Error::config("no children are registered with the remote"))
}

/// Pops the oldest message of the day, deleting it remotely once read.
pub fn consume_motd(network: &mut dyn Network) -> Result<Option<String>> {
    let request = ApiRequest::GetNotes {
        tag: Some(MOTD_TAG.to_string()),
        limit: Some(1),
    };
    let page: Page<NoteBody> = fetch(network, &request)?;
    let Some(note) = page.results.into_iter().next() else {
        debug!("no message of the day waiting");
        return Ok(None);
    };
    send(network, &ApiRequest::DeleteNote { note_id: note.id })?;
    Ok(Some(note.note))
}
