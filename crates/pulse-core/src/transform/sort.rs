//! Ordering, truncation and summation helpers.

use chrono::TimeDelta;

use super::TransformError;
use crate::Event;

/// Sorts events ascending by timestamp. The sort is stable.
pub fn sort_by_timestamp(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| e.timestamp);
    events
}

/// Sorts events by duration, longest first. The sort is stable.
pub fn sort_by_duration(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| b.duration.cmp(&a.duration));
    events
}

/// Total duration of all events.
pub fn sum_durations(events: &[Event]) -> TimeDelta {
    events
        .iter()
        .fold(TimeDelta::zero(), |acc, e| acc + e.duration)
}

/// Concatenates event lists in order.
pub fn concat<I>(lists: I) -> Vec<Event>
where
    I: IntoIterator<Item = Vec<Event>>,
{
    lists.into_iter().flatten().collect()
}

/// Keeps the first `limit` events.
///
/// A negative limit is an error; a limit past the end returns every event.
pub fn limit_events(mut events: Vec<Event>, limit: i64) -> Result<Vec<Event>, TransformError> {
    let limit = usize::try_from(limit).map_err(|_| TransformError::NegativeLimit { limit })?;
    events.truncate(limit);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::event;
    use serde_json::json;

    fn sample() -> Vec<Event> {
        vec![
            event(20, 5, json!({"n": 1})),
            event(0, 30, json!({"n": 2})),
            event(10, 10, json!({"n": 3})),
        ]
    }

    #[test]
    fn sort_by_timestamp_orders_ascending() {
        let sorted = sort_by_timestamp(sample());
        let order: Vec<_> = sorted.iter().map(|e| e.data()["n"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(3), json!(1)]);
    }

    #[test]
    fn sort_by_duration_orders_longest_first() {
        let sorted = sort_by_duration(sample());
        let order: Vec<_> = sorted.iter().map(|e| e.data()["n"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(3), json!(1)]);
    }

    #[test]
    fn sum_durations_adds_every_event() {
        assert_eq!(sum_durations(&sample()), TimeDelta::seconds(45));
        assert_eq!(sum_durations(&[]), TimeDelta::zero());
    }

    #[test]
    fn limit_events_edge_cases() {
        let events = sample();
        assert_eq!(
            limit_events(events.clone(), -1),
            Err(TransformError::NegativeLimit { limit: -1 })
        );
        assert!(limit_events(events.clone(), 0).unwrap().is_empty());
        assert_eq!(limit_events(events.clone(), 2).unwrap().len(), 2);

        let len = i64::try_from(events.len()).unwrap();
        assert_eq!(limit_events(events.clone(), len + 5).unwrap(), events);
    }

    #[test]
    fn concat_preserves_order() {
        let a = vec![event(10, 1, json!({"n": 1}))];
        let b = vec![event(0, 1, json!({"n": 2}))];
        let joined = concat([a, b]);
        assert_eq!(joined[0].data()["n"], json!(1));
        assert_eq!(joined[1].data()["n"], json!(2));
    }
}
