//! Normalizes the Hazemon `time_aggr` payload into [`Reading`]s.
//!
//! ```json
//! {"time_aggr": {"5132": {"1704078000": {"PM2.5": ["35.2"], "datetime(UTC+7)": ["2024-01-01 10:00:00"]}}}}
//! ```
//!
//! Only the first node key is considered. Entries whose timestamp key is not
//! numeric are skipped rather than failing the payload.

use log::debug;
use serde_json::{Map, Value};

use crate::reading::Reading;

const DATETIME_FIELD: &str = "datetime(UTC+7)";

fn node_entries(json: &Value) -> Option<(&str, &Map<String, Value>)> {
    let (node_key, by_timestamp) = json.get("time_aggr")?.as_object()?.iter().next()?;
    Some((node_key.as_str(), by_timestamp.as_object()?))
}

fn parse_timestamp_key(key: &str) -> Option<i64> {
    let value = key.trim().parse::<f64>().ok()?;
    if value.is_finite() {
        Some(value.trunc() as i64)
    } else {
        None
    }
}

/// Numbers, numeric strings, and single-element arrays of either.
fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(items) if items.len() == 1 => coerce_number(items.first()),
        _ => None,
    }?;
    if number.is_finite() {
        Some(number)
    } else {
        None
    }
}

fn first_string(value: Option<&Value>) -> Option<String> {
    value?.as_array()?.first()?.as_str().map(str::to_string)
}

fn to_reading(node_key: &str, timestamp: i64, record: &Value) -> Option<Reading> {
    let node_id = coerce_number(record.get("node_id"))
        .or_else(|| parse_timestamp_key(node_key).map(|n| n as f64))
        .map(|n| n as i64);

    let node_id = match node_id {
        Some(node_id) => node_id,
        None => {
            debug!("Skipping reading {} without a usable node id", timestamp);
            return None;
        }
    };

    Some(Reading {
        node_id,
        node_name: record
            .get("node_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        timestamp,
        datetime_local: first_string(record.get(DATETIME_FIELD)),
        pm25: coerce_number(record.get("PM2.5")),
        pm10: coerce_number(record.get("PM10")),
        pm1: coerce_number(record.get("PM1.0")),
        raw: record.clone(),
    })
}

/// The reading with the greatest timestamp key.
pub fn parse_latest(json: &Value) -> Option<Reading> {
    let (node_key, by_timestamp) = node_entries(json)?;

    let (timestamp, record) = by_timestamp
        .iter()
        .filter_map(|(key, record)| parse_timestamp_key(key).map(|ts| (ts, record)))
        .max_by_key(|(ts, _)| *ts)?;

    to_reading(node_key, timestamp, record)
}

/// Every reading at or after `from_epoch`, ascending by timestamp.
pub fn parse_series(json: &Value, from_epoch: Option<i64>) -> Vec<Reading> {
    let (node_key, by_timestamp) = match node_entries(json) {
        Some(entries) => entries,
        None => return Vec::new(),
    };

    let mut readings: Vec<Reading> = by_timestamp
        .iter()
        .filter_map(|(key, record)| {
            let timestamp = parse_timestamp_key(key)?;
            if from_epoch.map_or(false, |from| timestamp < from) {
                return None;
            }
            to_reading(node_key, timestamp, record)
        })
        .collect();

    readings.sort_by_key(|r| r.timestamp);
    readings.dedup_by_key(|r| r.timestamp);
    readings
}
