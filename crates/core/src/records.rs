//! Helpers over record lists shared by remote results and local fallback

use chrono::{DateTime, Utc};
use clientkey_domain::{DataRequest, Record};
use serde_json::Value;

/// When a record happened: `timestamp` for activities, else `created_at`
pub fn record_timestamp(record: &Record) -> Option<DateTime<Utc>> {
    ["timestamp", "created_at"]
        .iter()
        .filter_map(|key| record.get(*key)?.as_str())
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Objects of a JSON array; anything else yields nothing
pub fn into_records(data: Value) -> Vec<Record> {
    match data {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub fn field_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key)?.as_str()
}

/// Activities of one client (or all), newest first, at most `limit`
pub fn newest_activities(records: Vec<Record>, client_id: Option<&str>, limit: usize) -> Vec<Record> {
    let mut selected: Vec<Record> = records
        .into_iter()
        .filter(|r| client_id.map_or(true, |id| field_str(r, "client_id") == Some(id)))
        .collect();
    // stable sort keeps insertion order for equal or missing timestamps
    selected.reverse();
    selected.sort_by(|a, b| record_timestamp(b).cmp(&record_timestamp(a)));
    selected.truncate(limit);
    selected
}

/// First client whose email or name contains `term`, ignoring case
pub fn find_by_term(records: &[Record], term: &str) -> Option<Record> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return None;
    }
    records
        .iter()
        .find(|r| {
            ["email", "name"].iter().any(|key| {
                field_str(r, key).is_some_and(|value| value.to_lowercase().contains(&term))
            })
        })
        .cloned()
}

/// Narrow a raw SELECT result to what `request` asked for
pub fn shape_read(request: &DataRequest, data: Value) -> Value {
    match request {
        DataRequest::GetActivities { client_id, limit } => Value::Array(
            newest_activities(into_records(data), client_id.as_deref(), *limit)
                .into_iter()
                .map(Value::Object)
                .collect(),
        ),
        DataRequest::FindClient { term } => {
            find_by_term(&into_records(data), term).map_or(Value::Null, Value::Object)
        }
        _ => data,
    }
}
