//! `pulse insert`: bulk-load events into a bucket.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use pulse_core::{BucketId, Datastore, Event};
use serde_json::Value;

/// Parses events from a JSON array or from JSONL (one event per line).
pub fn parse_events(input: &str) -> Result<Vec<Event>> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).context("input is not a valid JSON array")?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                Event::from_json(value).with_context(|| format!("invalid event at index {i}"))
            })
            .collect();
    }

    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("line {} is not valid JSON", i + 1))?;
            Event::from_json(value).with_context(|| format!("invalid event on line {}", i + 1))
        })
        .collect()
}

/// Reads events from `reader` and inserts them all, or none on a parse error.
pub fn run<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    store: &dyn Datastore,
    bucket: &str,
) -> Result<()> {
    let bucket = BucketId::new(bucket)?;
    let mut input = String::new();
    reader
        .read_to_string(&mut input)
        .context("failed to read events from stdin")?;

    let events = parse_events(&input)?;
    let ids = store
        .insert_events(&bucket, &events)
        .with_context(|| format!("failed to insert events into {bucket}"))?;
    tracing::debug!(bucket = %bucket, count = ids.len(), "inserted events");

    writeln!(writer, "Inserted {} events into {bucket}", ids.len())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use pulse_core::{Bucket, MemoryDatastore};

    fn store() -> MemoryDatastore {
        let store = MemoryDatastore::new();
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        store
            .create_bucket(&Bucket::new("b1", "test", "test", "host", created).unwrap())
            .unwrap();
        store
    }

    #[test]
    fn parses_array_and_jsonl_alike() {
        let array = r#"[
            {"timestamp": "2025-01-01T09:00:00Z", "duration": 60, "data": {"app": "vim"}},
            {"timestamp": "2025-01-01T11:00:00+02:00", "data": {}}
        ]"#;
        let jsonl = concat!(
            r#"{"timestamp": "2025-01-01T09:00:00Z", "duration": 60, "data": {"app": "vim"}}"#,
            "\n\n",
            r#"{"timestamp": "2025-01-01T11:00:00+02:00", "data": {}}"#,
            "\n",
        );
        let from_array = parse_events(array).unwrap();
        assert_eq!(from_array, parse_events(jsonl).unwrap());
        assert_eq!(from_array[1].timestamp(), Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn reports_the_bad_line() {
        let jsonl = "{\"timestamp\": \"2025-01-01T09:00:00Z\"}\n{\"timestamp\": \"soon\"}\n";
        let err = parse_events(jsonl).unwrap_err();
        assert_eq!(err.to_string(), "invalid event on line 2");
    }

    #[test]
    fn inserts_everything_or_nothing() {
        let store = store();
        let bucket = BucketId::new("b1").unwrap();

        let mut out = Vec::new();
        let bad = "{\"timestamp\": \"2025-01-01T09:00:00Z\"}\n{\"duration\": -1}\n";
        assert!(run(&mut bad.as_bytes(), &mut out, &store, "b1").is_err());
        assert_eq!(store.get_event_count(&bucket, None, None).unwrap(), 0);

        let good = "{\"timestamp\": \"2025-01-01T09:00:00Z\", \"duration\": 5}\n";
        run(&mut good.as_bytes(), &mut out, &store, "b1").unwrap();
        assert_snapshot!(String::from_utf8(out).unwrap(), @"Inserted 1 events into b1");
        assert_eq!(store.get_event_count(&bucket, None, None).unwrap(), 1);
    }
}
