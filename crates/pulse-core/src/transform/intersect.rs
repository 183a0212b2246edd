//! Period intersection and span unions.

use chrono::{DateTime, Utc};
use serde_json::Map;

use super::sort::sort_by_timestamp;
use crate::{Event, Period};

/// Clips events to `period`.
///
/// Events entirely outside the period are dropped, events straddling a bound
/// are shortened to the overlap, and events fully inside pass unchanged.
pub fn filter_period_intersect(events: &[Event], period: Period) -> Vec<Event> {
    events
        .iter()
        .filter_map(|event| {
            let (start, end) = period.clip(event.timestamp, event.end())?;
            let mut clipped = event.clone();
            clipped.set_span(start, end);
            Some(clipped)
        })
        .collect()
}

/// Clips events to the union of the spans of `filter`.
///
/// An event overlapping several disjoint filter spans yields one clipped
/// piece per span.
pub fn filter_period_intersect_events(events: &[Event], filter: &[Event]) -> Vec<Event> {
    let periods = period_union(filter);
    let mut out = Vec::new();
    for event in events {
        let end = event.end();
        for period in &periods {
            if period.start() > end {
                break;
            }
            if let Some((start, clipped_end)) = period.clip(event.timestamp, end) {
                let mut piece = event.clone();
                piece.set_span(start, clipped_end);
                out.push(piece);
            }
        }
    }
    sort_by_timestamp(out)
}

/// Minimal ascending set of disjoint periods covering every event span.
///
/// Overlapping and touching spans merge into one period.
pub fn period_union(events: &[Event]) -> Vec<Period> {
    let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> =
        events.iter().map(|e| (e.timestamp, e.end())).collect();
    spans.sort_unstable();

    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .filter_map(|(start, end)| Period::new(start, end).ok())
        .collect()
}

/// The union of two event lists' spans, as events without data.
pub fn period_union_events(a: &[Event], b: &[Event]) -> Vec<Event> {
    let all: Vec<Event> = a.iter().chain(b).cloned().collect();
    period_union(&all)
        .into_iter()
        .map(|p| Event::from_parts(p.start(), p.duration(), Map::new()))
        .collect()
}

/// Events from both lists with duplicates removed, sorted by timestamp.
pub fn union(a: &[Event], b: &[Event]) -> Vec<Event> {
    let mut out: Vec<Event> = a.to_vec();
    for event in b {
        if !out.contains(event) {
            out.push(event.clone());
        }
    }
    sort_by_timestamp(out)
}

/// Adds the parts of `b` not covered by any event in `a`.
///
/// Events in `b` that overlap `a` are split around the covered spans, so the
/// result never double-counts time.
pub fn union_no_overlap(a: &[Event], b: &[Event]) -> Vec<Event> {
    let covered = period_union(a);
    let mut out: Vec<Event> = a.to_vec();

    for event in b {
        let mut pieces = vec![(event.timestamp, event.end())];
        for period in &covered {
            pieces = pieces
                .into_iter()
                .flat_map(|(start, end)| subtract(start, end, *period))
                .collect();
        }
        for (start, end) in pieces {
            let mut piece = event.clone();
            piece.set_span(start, end);
            out.push(piece);
        }
    }

    sort_by_timestamp(out)
}

/// Removes `period` from the span `[start, end)`, returning what is left.
fn subtract(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: Period,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if period.end() <= start || end <= period.start() {
        return vec![(start, end)];
    }
    let mut rest = Vec::with_capacity(2);
    if start < period.start() {
        rest.push((start, period.start()));
    }
    if period.end() < end {
        rest.push((period.end(), end));
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::{event, ts};
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn intersect_keeps_contained_and_drops_disjoint() {
        let period = Period::new(ts(100), ts(200)).unwrap();
        let inside = event(110, 20, json!({"app": "a"}));
        let outside = event(300, 10, json!({"app": "b"}));

        let result = filter_period_intersect(&[inside.clone(), outside], period);
        assert_eq!(result, vec![inside]);
    }

    #[test]
    fn intersect_clips_partial_overlaps() {
        let period = Period::new(ts(100), ts(200)).unwrap();
        let events = [
            event(90, 20, json!({"app": "a"})),
            event(190, 20, json!({"app": "b"})),
        ];

        let result = filter_period_intersect(&events, period);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].timestamp(), ts(100));
        assert_eq!(result[0].duration(), TimeDelta::seconds(10));
        assert_eq!(result[1].timestamp(), ts(190));
        assert_eq!(result[1].duration(), TimeDelta::seconds(10));
    }

    #[test]
    fn intersect_with_events_splits_across_filter_spans() {
        let events = [event(0, 100, json!({"app": "a"}))];
        let filter = [event(10, 10, json!({})), event(50, 10, json!({}))];

        let result = filter_period_intersect_events(&events, &filter);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].timestamp(), ts(10));
        assert_eq!(result[1].timestamp(), ts(50));
        assert!(result.iter().all(|e| e.duration() == TimeDelta::seconds(10)));
    }

    #[test]
    fn period_union_merges_overlapping_and_touching_spans() {
        let events = [
            event(20, 10, json!({})),
            event(0, 10, json!({})),
            event(10, 5, json!({})),
            event(50, 5, json!({})),
        ];

        let periods = period_union(&events);
        assert_eq!(
            periods,
            vec![
                Period::new(ts(0), ts(15)).unwrap(),
                Period::new(ts(20), ts(30)).unwrap(),
                Period::new(ts(50), ts(55)).unwrap(),
            ]
        );
    }

    #[test]
    fn union_drops_duplicates() {
        let a = [event(0, 10, json!({"x": 1}))];
        let b = [event(0, 10, json!({"x": 1})), event(5, 10, json!({"x": 2}))];

        let result = union(&a, &b);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn union_no_overlap_splits_around_covered_time() {
        let a = [event(10, 10, json!({"src": "a"}))];
        let b = [event(0, 30, json!({"src": "b"}))];

        let result = union_no_overlap(&a, &b);
        let spans: Vec<_> = result
            .iter()
            .map(|e| (e.timestamp(), e.end(), e.data()["src"].clone()))
            .collect();
        assert_eq!(
            spans,
            vec![
                (ts(0), ts(10), json!("b")),
                (ts(10), ts(20), json!("a")),
                (ts(20), ts(30), json!("b")),
            ]
        );
    }
}
