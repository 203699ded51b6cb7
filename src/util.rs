use chrono::{DateTime, FixedOffset, SecondsFormat, Timelike};

use crate::error::{Error, Result};

pub type Timestamp = DateTime<FixedOffset>;

/// Parses an `H:MM:SS[.ffffff]` duration into whole seconds; sub-second
/// precision is truncated.
pub fn duration_to_seconds(duration: &str) -> Result<u64> {
    let mut parts = duration.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::payload(format!(
            "invalid duration '{duration}', expected H:MM:SS"
        )));
    };

    let hours = hours
        .parse::<u64>()
        .map_err(|_| Error::payload(format!("invalid hours in duration '{duration}'")))?;
    let minutes = minutes
        .parse::<u64>()
        .map_err(|_| Error::payload(format!("invalid minutes in duration '{duration}'")))?;
    let whole_seconds = seconds.split('.').next().unwrap_or(seconds);
    let seconds = whole_seconds
        .parse::<u64>()
        .map_err(|_| Error::payload(format!("invalid seconds in duration '{duration}'")))?;

    hours
        .checked_mul(3_600)
        .and_then(|total| total.checked_add(minutes.checked_mul(60)?))
        .and_then(|total| total.checked_add(seconds))
        .ok_or_else(|| Error::payload(format!("duration '{duration}' is out of range")))
}

pub fn parse_timestamp(input: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(input)
        .or_else(|_| DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%:z"))
        .map_err(|err| Error::payload(format!("invalid timestamp '{input}': {err}")))
}

pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Human readable elapsed time, e.g. "1 hr 23 min 56 sec".
pub fn format_elapsed_time(elapsed_secs: u64) -> String {
    if elapsed_secs < 60 {
        format!("{elapsed_secs} sec")
    } else if elapsed_secs < 3_600 {
        format!("{} min {} sec", elapsed_secs / 60, elapsed_secs % 60)
    } else {
        format!(
            "{} hr {} min {} sec",
            elapsed_secs / 3_600,
            elapsed_secs / 60 % 60,
            elapsed_secs % 60
        )
    }
}

/// Short 12-hour time of day such as "1:23a".
pub fn time_of_day(timestamp: &Timestamp) -> String {
    let (is_pm, hour) = timestamp.hour12();
    let meridian = if is_pm { "p" } else { "a" };
    format!("{hour}:{:02}{meridian}", timestamp.minute())
}

pub fn whole_seconds_between(start: &Timestamp, end: &Timestamp) -> u64 {
    u64::try_from((*end - *start).num_seconds()).unwrap_or(0)
}

/// Serde adapter for optional ISO-8601 timestamps.
pub mod iso8601 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Timestamp, format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(value: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(timestamp) => serializer.serialize_some(&format_timestamp(timestamp)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Timestamp>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse_timestamp(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
