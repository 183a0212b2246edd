//! The heartbeat merge rule.
//!
//! A heartbeat extends the previous event when both carry equal data and the
//! heartbeat starts no later than `pulsetime` after the previous event ends.

use chrono::TimeDelta;

use crate::{Event, data_eq};

/// Merges `heartbeat` into `last`, or returns `None` if they must stay apart.
///
/// The merged event keeps `last`'s id and timestamp and ends at the later of
/// the two ends, so replaying a heartbeat that was already merged changes
/// nothing. Heartbeats that start before `last` never merge.
pub fn heartbeat_merge(last: &Event, heartbeat: &Event, pulsetime: TimeDelta) -> Option<Event> {
    if !data_eq(&last.data, &heartbeat.data) {
        return None;
    }
    if heartbeat.timestamp < last.timestamp {
        return None;
    }
    let last_end = last.end();
    if heartbeat.timestamp - last_end > pulsetime {
        return None;
    }

    let mut merged = last.clone();
    merged.set_span(last.timestamp, last_end.max(heartbeat.end()));
    Some(merged)
}

/// Folds a sequence of heartbeats into the events they coalesce into.
pub fn heartbeat_reduce(heartbeats: Vec<Event>, pulsetime: TimeDelta) -> Vec<Event> {
    let mut reduced: Vec<Event> = Vec::new();
    for heartbeat in heartbeats {
        if let Some(last) = reduced.last_mut() {
            if let Some(merged) = heartbeat_merge(last, &heartbeat, pulsetime) {
                *last = merged;
                continue;
            }
        }
        reduced.push(heartbeat);
    }
    reduced
}
