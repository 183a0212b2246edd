//! Gap flooding.

use chrono::TimeDelta;

use super::sort::sort_by_timestamp;
use crate::Event;

/// Bridges short idle gaps between consecutive events.
///
/// Events are sorted by timestamp, then every event followed by a gap of at
/// most `pulsetime` is extended to end where the next event starts. Gaps wider
/// than `pulsetime` and overlapping events are left alone. Applying `flood`
/// twice with the same pulsetime gives the same result as applying it once.
pub fn flood(events: Vec<Event>, pulsetime: TimeDelta) -> Vec<Event> {
    let mut events = sort_by_timestamp(events);
    for i in 1..events.len() {
        let next_start = events[i].timestamp;
        let current = &mut events[i - 1];
        let gap = next_start - current.end();
        if gap > TimeDelta::zero() && gap <= pulsetime {
            current.duration = next_start - current.timestamp;
        }
    }
    events
}
