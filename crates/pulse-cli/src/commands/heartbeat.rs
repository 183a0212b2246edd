//! `pulse heartbeat`: push one heartbeat through the coalescer.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::{BucketId, Datastore, Event, HeartbeatCoalescer};
use serde_json::{Map, Value};

pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub data: Map<String, Value>,
}

/// Applies the heartbeat and writes the stored event it produced.
pub fn run<W: Write, D: Datastore + ?Sized>(
    writer: &mut W,
    coalescer: &HeartbeatCoalescer<D>,
    bucket: &str,
    heartbeat: Heartbeat,
    pulsetime: TimeDelta,
) -> Result<()> {
    let bucket = BucketId::new(bucket)?;
    let event = Event::new(heartbeat.timestamp, heartbeat.duration_secs, heartbeat.data)?;
    let stored = coalescer
        .heartbeat(&bucket, event, pulsetime)
        .with_context(|| format!("failed to record heartbeat in {bucket}"))?;

    writeln!(writer, "{}", serde_json::to_string(&stored)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use insta::assert_snapshot;
    use pulse_core::{Bucket, CoalescerConfig, MemoryDatastore};
    use serde_json::json;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, secs).unwrap()
    }

    fn beat(secs: u32, app: &str) -> Heartbeat {
        let mut data = Map::new();
        data.insert("app".to_string(), json!(app));
        Heartbeat {
            timestamp: at(secs),
            duration_secs: 0.0,
            data,
        }
    }

    #[test]
    fn consecutive_heartbeats_extend_one_event() {
        let store = Arc::new(MemoryDatastore::new());
        store
            .create_bucket(&Bucket::new("b1", "currentwindow", "test", "host", at(0)).unwrap())
            .unwrap();
        let coalescer = HeartbeatCoalescer::new(store.clone(), CoalescerConfig::default());
        let pulsetime = TimeDelta::seconds(10);

        let mut out = Vec::new();
        for (secs, app) in [(0, "vim"), (5, "vim"), (9, "vim"), (30, "vim")] {
            run(&mut out, &coalescer, "b1", beat(secs, app), pulsetime).unwrap();
        }

        assert_snapshot!(String::from_utf8(out).unwrap(), @r#"
        {"id":1,"timestamp":"2025-01-01T09:00:00Z","duration":0.0,"data":{"app":"vim"}}
        {"id":1,"timestamp":"2025-01-01T09:00:00Z","duration":5.0,"data":{"app":"vim"}}
        {"id":1,"timestamp":"2025-01-01T09:00:00Z","duration":9.0,"data":{"app":"vim"}}
        {"id":2,"timestamp":"2025-01-01T09:00:30Z","duration":0.0,"data":{"app":"vim"}}
        "#);
    }

    #[test]
    fn missing_bucket_fails() {
        let store = Arc::new(MemoryDatastore::new());
        let coalescer = HeartbeatCoalescer::new(store, CoalescerConfig::default());
        let mut out = Vec::new();
        let result = run(&mut out, &coalescer, "nope", beat(0, "vim"), TimeDelta::seconds(10));
        assert!(result.is_err());
        assert!(out.is_empty());
    }
}
