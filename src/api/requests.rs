use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::api::{HttpRequest, Verb};
use crate::error::{Error, Result};
use crate::timer::{Timer, TimerPayload};

pub const MOTD_TAG: &str = "BabyPod MOTD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feeding {
    pub child_id: u64,
    pub food_type: String,
    pub method: String,
    #[serde(flatten)]
    pub timer: TimerPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub child_id: u64,
    pub is_wet: bool,
    pub is_solid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pumping {
    pub child_id: u64,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(flatten)]
    pub timer: TimerPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep {
    pub child_id: u64,
    #[serde(default)]
    pub nap: Option<bool>,
    #[serde(flatten)]
    pub timer: TimerPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TummyTime {
    pub child_id: u64,
    #[serde(flatten)]
    pub timer: TimerPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Writes that can be queued offline and replayed later. Serialized as
/// `{"type": <kind>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Record {
    Feeding(Feeding),
    Change(Change),
    Pumping(Pumping),
    Sleep(Sleep),
    TummyTime(TummyTime),
}

impl Record {
    pub fn feeding(
        child_id: u64,
        food_type: impl Into<String>,
        method: impl Into<String>,
        timer: &Timer,
        notes: String,
    ) -> Result<Self> {
        Ok(Self::Feeding(Feeding {
            child_id,
            food_type: food_type.into(),
            method: method.into(),
            timer: timer.payload()?,
            notes: Some(notes),
        }))
    }

    pub fn change(child_id: u64, is_wet: bool, is_solid: bool, notes: String) -> Self {
        Self::Change(Change {
            child_id,
            is_wet,
            is_solid,
            notes: Some(notes),
        })
    }

    pub fn pumping(child_id: u64, amount: Option<f64>, timer: &Timer, notes: String) -> Result<Self> {
        Ok(Self::Pumping(Pumping {
            child_id,
            amount,
            timer: timer.payload()?,
            notes: Some(notes),
        }))
    }

    pub fn sleep(child_id: u64, nap: Option<bool>, timer: &Timer, notes: String) -> Result<Self> {
        Ok(Self::Sleep(Sleep {
            child_id,
            nap,
            timer: timer.payload()?,
            notes: Some(notes),
        }))
    }

    pub fn tummy_time(child_id: u64, timer: &Timer, notes: String) -> Result<Self> {
        Ok(Self::TummyTime(TummyTime {
            child_id,
            timer: timer.payload()?,
            notes: Some(notes),
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Feeding(_) => "feeding",
            Self::Change(_) => "change",
            Self::Pumping(_) => "pumping",
            Self::Sleep(_) => "sleep",
            Self::TummyTime(_) => "tummy_time",
        }
    }

    /// Logical timer name of the activity, for kinds that embed a timer.
    pub fn timer_name(&self) -> Option<&'static str> {
        match self {
            Self::Change(_) => None,
            _ => Some(self.kind()),
        }
    }

    pub fn timer(&self) -> Option<&TimerPayload> {
        match self {
            Self::Feeding(record) => Some(&record.timer),
            Self::Pumping(record) => Some(&record.timer),
            Self::Sleep(record) => Some(&record.timer),
            Self::TummyTime(record) => Some(&record.timer),
            Self::Change(_) => None,
        }
    }

    pub fn timer_mut(&mut self) -> Option<&mut TimerPayload> {
        match self {
            Self::Feeding(record) => Some(&mut record.timer),
            Self::Pumping(record) => Some(&mut record.timer),
            Self::Sleep(record) => Some(&mut record.timer),
            Self::TummyTime(record) => Some(&mut record.timer),
            Self::Change(_) => None,
        }
    }

    /// Rebuilds the embedded timer for kinds that carry one.
    pub fn embedded_timer(&self) -> Option<Timer> {
        Some(Timer::from_payload(self.timer_name()?, self.timer()?))
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Self::Feeding(record) => record.notes.as_deref(),
            Self::Change(record) => record.notes.as_deref(),
            Self::Pumping(record) => record.notes.as_deref(),
            Self::Sleep(record) => record.notes.as_deref(),
            Self::TummyTime(record) => record.notes.as_deref(),
        }
    }

    pub fn serialize_to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn deserialize_from_json(value: &Value) -> Result<Self> {
        Record::deserialize(value).map_err(|err| Error::payload(format!("unreadable queued request: {err}")))
    }

    fn to_http(&self) -> Result<HttpRequest> {
        let (uri, mut payload) = match self {
            Self::Feeding(record) => (
                "feedings",
                object(json!({
                    "child": record.child_id,
                    "type": record.food_type,
                    "method": record.method,
                })),
            ),
            Self::Change(record) => (
                "changes",
                object(json!({
                    "child": record.child_id,
                    "wet": record.is_wet,
                    "solid": record.is_solid,
                })),
            ),
            Self::Pumping(record) => {
                let mut payload = object(json!({"child": record.child_id}));
                if let Some(amount) = record.amount {
                    payload.insert("amount".to_string(), json!(amount));
                }
                ("pumping", payload)
            }
            Self::Sleep(record) => {
                let mut payload = object(json!({"child": record.child_id}));
                if let Some(nap) = record.nap {
                    payload.insert("nap".to_string(), Value::Bool(nap));
                }
                ("sleep", payload)
            }
            Self::TummyTime(record) => ("tummy-times", object(json!({"child": record.child_id}))),
        };

        if let Some(timer) = self.timer() {
            payload.extend(timer.wire()?.to_json());
        }
        if let Some(notes) = self.notes() {
            payload.insert("notes".to_string(), Value::String(notes.to_string()));
        }
        Ok(HttpRequest::new(Verb::Post, uri).with_payload(payload))
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Every call the device makes against the remote system.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    Record(Record),
    GetNamedTimer { name: String },
    CreateTimer { name: String },
    DeleteTimer { timer_id: u64 },
    GetAllTimers { tag: Option<String>, limit: Option<u32> },
    GetLastFeeding { child_id: u64 },
    GetFirstChild,
    GetNotes { tag: Option<String>, limit: Option<u32> },
    DeleteNote { note_id: u64 },
}

impl From<Record> for ApiRequest {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl ApiRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(record) => record.kind(),
            Self::GetNamedTimer { .. } => "get_named_timer",
            Self::CreateTimer { .. } => "create_timer",
            Self::DeleteTimer { .. } => "delete_timer",
            Self::GetAllTimers { .. } => "get_all_timers",
            Self::GetLastFeeding { .. } => "get_last_feeding",
            Self::GetFirstChild => "get_first_child",
            Self::GetNotes { .. } => "get_notes",
            Self::DeleteNote { .. } => "delete_note",
        }
    }

    /// The queueable form of this request; `None` for kinds that only make
    /// sense online.
    pub fn offline_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn to_http(&self) -> Result<HttpRequest> {
        Ok(match self {
            Self::Record(record) => record.to_http()?,
            Self::GetNamedTimer { name } => {
                HttpRequest::new(Verb::Get, "timers").with_query("name", name)
            }
            Self::CreateTimer { name } => HttpRequest::new(Verb::Post, "timers")
                .with_payload(object(json!({"name": name}))),
            Self::DeleteTimer { timer_id } => {
                HttpRequest::new(Verb::Delete, format!("timers/{timer_id}"))
            }
            Self::GetAllTimers { tag, limit } => {
                filtered(HttpRequest::new(Verb::Get, "timers"), tag.as_deref(), *limit)?
            }
            Self::GetLastFeeding { child_id } => HttpRequest::new(Verb::Get, "feedings")
                .with_query("limit", 1)
                .with_query("child_id", child_id),
            Self::GetFirstChild => HttpRequest::new(Verb::Get, "children"),
            Self::GetNotes { tag, limit } => {
                filtered(HttpRequest::new(Verb::Get, "notes"), tag.as_deref(), *limit)?
            }
            Self::DeleteNote { note_id } => {
                HttpRequest::new(Verb::Delete, format!("notes/{note_id}"))
            }
        })
    }
}

fn filtered(mut request: HttpRequest, tag: Option<&str>, limit: Option<u32>) -> Result<HttpRequest> {
    if let Some(limit) = limit {
        if limit == 0 {
            return Err(Error::config("result limit must be at least 1"));
        }
        request = request.with_query("limit", limit);
    }
    if let Some(tag) = tag {
        request = request.with_query("tags", tag);
    }
    Ok(request)
}

/// Device name, then any extra lines, then the battery consumed while the
/// timer ran when both readings are known.
pub fn compose_notes(
    device_name: &str,
    extra: &[String],
    starting_battery_percent: Option<u8>,
    ending_battery_percent: Option<u8>,
) -> String {
    let mut lines: Vec<String> = extra.to_vec();
    if let (Some(start), Some(end)) = (starting_battery_percent, ending_battery_percent) {
        let consumed = i16::from(start) - i16::from(end);
        lines.push(format!("🔋 {start}% → {end}%, Δ{consumed}%"));
    }

    let mut notes = device_name.to_string();
    if !lines.is_empty() {
        notes.push('\n');
        notes.push_str(&lines.join("\n"));
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::parse_timestamp;

    fn local_feeding_timer() -> Timer {
        let mut timer = Timer::new("feeding", true);
        timer.started_at = parse_timestamp("2025-02-01T09:00:00-05:00").ok();
        timer.ended_at = parse_timestamp("2025-02-01T09:20:00-05:00").ok();
        timer
    }

    #[test]
    fn notes_include_battery_delta_when_known() {
        assert_eq!(compose_notes("BabyPod", &[], None, Some(50)), "BabyPod");
        assert_eq!(
            compose_notes("Nursery", &["left side".to_string()], Some(80), Some(74)),
            "Nursery\nleft side\n🔋 80% → 74%, Δ6%"
        );
    }

    #[test]
    fn queued_feeding_serializes_with_type_tag() {
        let record = Record::feeding(
            7,
            "breast milk",
            "left breast",
            &local_feeding_timer(),
            "BabyPod".to_string(),
        )
        .expect("record");
        let json = record.serialize_to_json().expect("json");
        assert_eq!(
            json,
            json!({
                "type": "feeding",
                "payload": {
                    "child_id": 7,
                    "food_type": "breast milk",
                    "method": "left breast",
                    "start": "2025-02-01T09:00:00-05:00",
                    "end": "2025-02-01T09:20:00-05:00",
                    "notes": "BabyPod"
                }
            })
        );
        assert_eq!(Record::deserialize_from_json(&json).expect("parse"), record);
    }

    #[test]
    fn unknown_queued_kind_is_a_payload_error() {
        let err = Record::deserialize_from_json(&json!({"type": "bath", "payload": {}}))
            .expect_err("unknown kind");
        assert!(err.to_string().contains("unreadable queued request"));
    }

    #[test]
    fn feeding_wire_payload_prefers_remote_timer() {
        let mut timer = local_feeding_timer();
        timer.timer_id = Some(44);
        timer.offline = false;
        let record = Record::feeding(7, "formula", "bottle", &timer, "BabyPod".to_string())
            .expect("record");
        let http = ApiRequest::from(record).to_http().expect("http");
        assert_eq!(http.verb, Verb::Post);
        assert_eq!(http.uri, "feedings");
        assert_eq!(
            http.payload.map(Value::Object),
            Some(json!({
                "child": 7,
                "type": "formula",
                "method": "bottle",
                "timer": 44,
                "notes": "BabyPod"
            }))
        );
    }

    #[test]
    fn change_wire_payload_uses_remote_field_names() {
        let http = ApiRequest::from(Record::change(3, true, false, "BabyPod".to_string()))
            .to_http()
            .expect("http");
        assert_eq!(http.uri, "changes");
        assert_eq!(
            http.payload.map(Value::Object),
            Some(json!({"child": 3, "wet": true, "solid": false, "notes": "BabyPod"}))
        );
    }

    #[test]
    fn sleep_and_tummy_time_use_their_endpoints() {
        let timer = local_feeding_timer();
        let sleep = Record::sleep(1, Some(true), &timer, "n".to_string()).expect("sleep");
        let http = ApiRequest::from(sleep).to_http().expect("http");
        assert_eq!(http.uri, "sleep");
        assert_eq!(http.payload.as_ref().and_then(|p| p.get("nap")), Some(&json!(true)));

        let tummy = Record::tummy_time(1, &timer, "n".to_string()).expect("tummy");
        assert_eq!(tummy.timer_name(), Some("tummy_time"));
        assert_eq!(ApiRequest::from(tummy).to_http().expect("http").uri, "tummy-times");
    }

    #[test]
    fn online_only_kinds_have_no_offline_record() {
        let request = ApiRequest::GetNamedTimer {
            name: "feeding".to_string(),
        };
        assert!(request.offline_record().is_none());
        assert_eq!(request.kind(), "get_named_timer");
        assert!(
            ApiRequest::from(Record::change(1, true, true, String::new()))
                .offline_record()
                .is_some()
        );
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = ApiRequest::GetNotes {
            tag: Some(MOTD_TAG.to_string()),
            limit: Some(0),
        }
        .to_http()
        .expect_err("zero limit");
        assert!(err.to_string().contains("at least 1"));

        let http = ApiRequest::GetNotes {
            tag: Some(MOTD_TAG.to_string()),
            limit: Some(1),
        }
        .to_http()
        .expect("notes");
        assert_eq!(
            http.query,
            vec![
                ("limit".to_string(), "1".to_string()),
                ("tags".to_string(), MOTD_TAG.to_string())
            ]
        );
    }

    #[test]
    fn unstarted_timer_cannot_be_recorded() {
        let err = Record::pumping(1, Some(2.5), &Timer::new("pumping", true), String::new())
            .expect_err("unstarted");
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
