//! Small cross-reboot state kept in one overwritten JSON document.

use log::{info, warn};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::timer::{Timer, TimerPayload};
use crate::util::{Timestamp, format_timestamp, parse_timestamp};

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineState {
    pub last_feeding: Option<Timestamp>,
    pub last_feeding_method: Option<String>,
    pub last_rtc_set: Option<Timestamp>,
    pub rtc_utc_offset: Option<f64>,
    pub last_motd_check: Option<Timestamp>,
    pub active_timer_name: Option<String>,
    pub active_timer: Option<Timer>,
}

/// How one persisted field maps to and from JSON. Adding a field means adding
/// a row to [`FIELDS`].
struct FieldCodec {
    key: &'static str,
    encode: fn(&OfflineState) -> Value,
    decode: fn(&mut OfflineState, &Value) -> Result<()>,
}

// `active_timer_name` must decode before `active_timer`, which takes its name.
static FIELDS: &[FieldCodec] = &[
    FieldCodec {
        key: "last_feeding",
        encode: |state| encode_timestamp(state.last_feeding.as_ref()),
        decode: |state, value| {
            state.last_feeding = decode_timestamp(value)?;
            Ok(())
        },
    },
    FieldCodec {
        key: "last_feeding_method",
        encode: |state| encode_string(state.last_feeding_method.as_deref()),
        decode: |state, value| {
            state.last_feeding_method = decode_string(value)?;
            Ok(())
        },
    },
    FieldCodec {
        key: "last_rtc_set",
        encode: |state| encode_timestamp(state.last_rtc_set.as_ref()),
        decode: |state, value| {
            state.last_rtc_set = decode_timestamp(value)?;
            Ok(())
        },
    },
    FieldCodec {
        key: "rtc_utc_offset",
        encode: |state| {
            state
                .rtc_utc_offset
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number)
        },
        decode: |state, value| {
            state.rtc_utc_offset = match value {
                Value::Null => None,
                other => Some(
                    other
                        .as_f64()
                        .ok_or_else(|| Error::payload(format!("expected a number, got {other}")))?,
                ),
            };
            Ok(())
        },
    },
    FieldCodec {
        key: "last_motd_check",
        encode: |state| encode_timestamp(state.last_motd_check.as_ref()),
        decode: |state, value| {
            state.last_motd_check = decode_timestamp(value)?;
            Ok(())
        },
    },
    FieldCodec {
        key: "active_timer_name",
        encode: |state| encode_string(state.active_timer_name.as_deref()),
        decode: |state, value| {
            state.active_timer_name = decode_string(value)?;
            Ok(())
        },
    },
    FieldCodec {
        key: "active_timer",
        encode: |state| {
            state
                .active_timer
                .as_ref()
                .and_then(|timer| timer.payload().ok())
                .map_or(Value::Null, |payload| Value::Object(payload.to_json()))
        },
        decode: |state, value| {
            if value.is_null() {
                state.active_timer = None;
                return Ok(());
            }
            let payload = TimerPayload::from_json(value)?;
            let name = state.active_timer_name.as_deref().unwrap_or_default();
            state.active_timer = Some(Timer::from_payload(name, &payload));
            Ok(())
        },
    },
];

fn encode_timestamp(value: Option<&Timestamp>) -> Value {
    value.map_or(Value::Null, |timestamp| Value::String(format_timestamp(timestamp)))
}

fn decode_timestamp(value: &Value) -> Result<Option<Timestamp>> {
    match value {
        Value::Null => Ok(None),
        Value::String(raw) => parse_timestamp(raw).map(Some),
        other => Err(Error::payload(format!("expected a timestamp, got {other}"))),
    }
}

fn encode_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::String(text.to_string()))
}

fn decode_string(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        other => Err(Error::payload(format!("expected a string, got {other}"))),
    }
}

impl OfflineState {
    /// Reads the snapshot. A missing or unreadable document yields defaults,
    /// which are written back so the next boot starts clean.
    pub fn load(storage: &dyn Storage) -> Self {
        let document = match storage.read(STATE_FILE) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(document)) => Some(document),
                Ok(_) => {
                    warn!("{STATE_FILE} is not a JSON object, starting fresh");
                    None
                }
                Err(err) => {
                    warn!("{STATE_FILE} is corrupt ({err}), starting fresh");
                    None
                }
            },
            Ok(None) => {
                info!("no {STATE_FILE} yet, starting fresh");
                None
            }
            Err(err) => {
                warn!("unable to read {STATE_FILE} ({err}), starting fresh");
                None
            }
        };

        match document {
            Some(document) => Self::from_json(&document),
            None => {
                let state = Self::default();
                if let Err(err) = state.save(storage) {
                    warn!("unable to write fresh {STATE_FILE}: {err}");
                }
                state
            }
        }
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let text = serde_json::to_string_pretty(&Value::Object(self.to_json()))?;
        storage.write(STATE_FILE, format!("{text}\n").as_bytes())?;
        Ok(())
    }

    pub fn to_json(&self) -> Map<String, Value> {
        FIELDS
            .iter()
            .map(|field| (field.key.to_string(), (field.encode)(self)))
            .collect()
    }

    /// Missing or malformed fields stay unknown.
    pub fn from_json(document: &Map<String, Value>) -> Self {
        let mut state = Self::default();
        for field in FIELDS {
            let Some(value) = document.get(field.key) else {
                continue;
            };
            if let Err(err) = (field.decode)(&mut state, value) {
                warn!("ignoring {} in {STATE_FILE}: {err}", field.key);
            }
        }
        state
    }

    /// Records `timer` as the crash-recovery snapshot, or clears it.
    pub fn set_active_timer(&mut self, timer: Option<&Timer>) {
        self.active_timer_name = timer.map(|timer| timer.name.clone());
        self.active_timer = timer.cloned();
    }
}
