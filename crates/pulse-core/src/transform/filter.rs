//! Filtering on data values.

use regex::Regex;
use serde_json::Value;

use crate::{Event, values_eq};

/// Keeps events whose `key` holds one of `values`.
///
/// With `exclude` set the selection is inverted: events whose `key` holds one
/// of `values` are dropped and everything else, including events without the
/// key, is kept.
pub fn filter_keyvals(events: Vec<Event>, key: &str, values: &[Value], exclude: bool) -> Vec<Event> {
    events
        .into_iter()
        .filter(|event| {
            let hit = event.data.get(key).is_some_and(|v| values.iter().any(|want| values_eq(want, v)));
            hit != exclude
        })
        .collect()
}

/// Keeps events whose string value at `key` matches `regex`.
pub fn filter_keyvals_regex(events: Vec<Event>, key: &str, regex: &Regex) -> Vec<Event> {
    events
        .into_iter()
        .filter(|event| {
            event
                .data
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| regex.is_match(s))
        })
        .collect()
}
