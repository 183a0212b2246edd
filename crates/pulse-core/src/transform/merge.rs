//! Grouping events by data values.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use crate::{Event, canonical_value, data_eq, values_eq};

/// Data key holding the merged events of a [`chunk_events_by_key`] chunk.
pub const SUBEVENTS_KEY: &str = "subevents";

struct Group {
    timestamp: DateTime<Utc>,
    duration: TimeDelta,
    data: Map<String, Value>,
}

/// Merges all events that share the same values for `keys`.
///
/// Each group becomes one event whose duration is the group total, whose
/// timestamp is the earliest in the group, and whose data holds only the
/// grouping keys. Events missing any key are skipped. Groups are returned in
/// ascending timestamp order, so any permutation of the same input yields the
/// same output.
pub fn merge_events_by_keys<S: AsRef<str>>(events: &[Event], keys: &[S]) -> Vec<Event> {
    if keys.is_empty() {
        return Vec::new();
    }

    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    'events: for event in events {
        let mut data = Map::new();
        for key in keys {
            let key = key.as_ref();
            let Some(value) = event.data.get(key) else {
                continue 'events;
            };
            data.insert(key.to_string(), value.clone());
        }

        // Map serialization is key-ordered, so equal values give equal strings.
        let group_key = canonical_value(&Value::Object(data.clone())).to_string();
        groups
            .entry(group_key)
            .and_modify(|group| {
                group.duration += event.duration;
                group.timestamp = group.timestamp.min(event.timestamp);
            })
            .or_insert(Group {
                timestamp: event.timestamp,
                duration: event.duration,
                data,
            });
    }

    let mut merged: Vec<Event> = groups
        .into_values()
        .map(|g| Event::from_parts(g.timestamp, g.duration, g.data))
        .collect();
    merged.sort_by_key(|e| e.timestamp);
    merged
}

/// Merges runs of consecutive events that share the value at `key`.
///
/// A chunk keeps the first event's timestamp, sums the durations, and stores
/// the key plus the original events (as JSON) under [`SUBEVENTS_KEY`].
/// Events without the key are skipped.
pub fn chunk_events_by_key(events: &[Event], key: &str) -> Vec<Event> {
    let mut chunks: Vec<Event> = Vec::new();
    for event in events {
        let Some(value) = event.data.get(key) else {
            continue;
        };

        if let Some(last) = chunks.last_mut() {
            if last.data.get(key).is_some_and(|prev| values_eq(prev, value)) {
                last.duration += event.duration;
                if let Some(Value::Array(subevents)) = last.data.get_mut(SUBEVENTS_KEY) {
                    subevents.push(event.to_json());
                }
                continue;
            }
        }

        let mut data = Map::new();
        data.insert(key.to_string(), value.clone());
        data.insert(
            SUBEVENTS_KEY.to_string(),
            Value::Array(vec![event.to_json()]),
        );
        chunks.push(Event::from_parts(event.timestamp, event.duration, data));
    }
    chunks
}

/// Joins touching or overlapping events that carry equal data.
///
/// Input is sorted by timestamp first. Each run of equal-data events whose
/// spans meet becomes one event covering the whole run; a gap of any length
/// or a data change starts a new event.
pub fn merge_events(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| e.timestamp);
    let mut merged: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(last) = merged.last_mut() {
            let last_end = last.end();
            if event.timestamp <= last_end && data_eq(&last.data, &event.data) {
                last.set_span(last.timestamp, last_end.max(event.end()));
                continue;
            }
        }
        merged.push(event);
    }
    merged
}
