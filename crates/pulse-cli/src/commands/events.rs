//! `pulse events`: dump a bucket's events as JSONL.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pulse_core::{BucketId, Datastore};

pub fn run<W: Write>(
    writer: &mut W,
    store: &dyn Datastore,
    bucket: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
) -> Result<()> {
    let bucket = BucketId::new(bucket)?;
    let events = store
        .get_events(&bucket, start, end, limit)
        .with_context(|| format!("failed to read events from {bucket}"))?;

    for event in events {
        writeln!(writer, "{}", serde_json::to_string(&event)?)?;
    }
    Ok(())
}
