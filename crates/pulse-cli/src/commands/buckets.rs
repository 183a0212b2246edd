//! `pulse buckets`: list, create and delete buckets.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Utc;
use pulse_core::{Bucket, BucketId, Datastore};

/// Writes every bucket, as a table or as a JSON array.
pub fn list<W: Write>(writer: &mut W, store: &dyn Datastore, json: bool) -> Result<()> {
    let buckets = store.buckets().context("failed to list buckets")?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&buckets)?)?;
        return Ok(());
    }

    if buckets.is_empty() {
        writeln!(writer, "No buckets.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<28}  {:<16}  {:<12}  {:<12}  {:>7}",
        "ID", "Type", "Client", "Hostname", "Events"
    )?;
    for bucket in &buckets {
        let count = store
            .get_event_count(&bucket.id, None, None)
            .with_context(|| format!("failed to count events in {}", bucket.id))?;
        writeln!(
            writer,
            "{:<28}  {:<16}  {:<12}  {:<12}  {:>7}",
            bucket.id.as_str(),
            bucket.kind.as_str(),
            bucket.client,
            bucket.hostname,
            count
        )?;
    }
    Ok(())
}

pub struct NewBucket<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub client: &'a str,
    pub hostname: Option<&'a str>,
    pub name: Option<&'a str>,
}

pub fn create<W: Write>(writer: &mut W, store: &dyn Datastore, new: &NewBucket<'_>) -> Result<()> {
    let hostname = match new.hostname {
        Some(h) => h.to_string(),
        None => local_hostname(),
    };
    let mut bucket = Bucket::new(new.id, new.kind, new.client, hostname, Utc::now())?;
    if let Some(name) = new.name {
        bucket = bucket.with_name(name);
    }

    let created = store
        .create_bucket(&bucket)
        .with_context(|| format!("failed to create bucket {}", new.id))?;
    writeln!(writer, "{}", created.id)?;
    Ok(())
}

pub fn delete<W: Write>(writer: &mut W, store: &dyn Datastore, id: &str) -> Result<()> {
    let id = BucketId::new(id)?;
    store
        .delete_bucket(&id)
        .with_context(|| format!("failed to delete bucket {id}"))?;
    writeln!(writer, "Deleted {id}")?;
    Ok(())
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use insta::assert_snapshot;
    use pulse_core::{Event, MemoryDatastore};
    use serde_json::Map;

    fn output(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn seeded() -> MemoryDatastore {
        let store = MemoryDatastore::new();
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for (id, kind, host) in [
            ("aw-watcher-window_laptop", "currentwindow", "laptop"),
            ("aw-watcher-afk_laptop", "afkstatus", "laptop"),
        ] {
            store
                .create_bucket(&Bucket::new(id, kind, "aw-watcher", host, created).unwrap())
                .unwrap();
        }
        let window = BucketId::new("aw-watcher-window_laptop").unwrap();
        let events: Vec<Event> = (0..3)
            .map(|i| Event::from_parts(created + TimeDelta::minutes(i), TimeDelta::minutes(1), Map::new()))
            .collect();
        store.insert_events(&window, &events).unwrap();
        store
    }

    #[test]
    fn list_empty() {
        let store = MemoryDatastore::new();
        assert_snapshot!(output(|w| list(w, &store, false)), @"No buckets.");
    }

    #[test]
    fn list_table_with_counts() {
        let store = seeded();
        assert_snapshot!(output(|w| list(w, &store, false)), @r"
        ID                            Type              Client        Hostname       Events
        aw-watcher-afk_laptop         afkstatus         aw-watcher    laptop              0
        aw-watcher-window_laptop      currentwindow     aw-watcher    laptop              3
        ");
    }

    #[test]
    fn list_json_round_trips_metadata() {
        let store = seeded();
        let text = output(|w| list(w, &store, true));
        let parsed: Vec<Bucket> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, store.buckets().unwrap());
    }

    #[test]
    fn create_then_delete() {
        let store = MemoryDatastore::new();
        let new = NewBucket {
            id: "b1",
            kind: "test",
            client: "pulse-cli",
            hostname: Some("box"),
            name: Some("Test bucket"),
        };

        assert_snapshot!(output(|w| create(w, &store, &new)), @"b1");
        let bucket = store.get_bucket_metadata(&BucketId::new("b1").unwrap()).unwrap();
        assert_eq!(bucket.hostname, "box");
        assert_eq!(bucket.name.as_deref(), Some("Test bucket"));

        let mut sink = Vec::new();
        assert!(create(&mut sink, &store, &new).is_err());

        assert_snapshot!(output(|w| delete(w, &store, "b1")), @"Deleted b1");
        assert!(store.buckets().unwrap().is_empty());
    }

    #[test]
    fn create_rejects_empty_type() {
        let store = MemoryDatastore::new();
        let new = NewBucket {
            id: "b1",
            kind: "",
            client: "pulse-cli",
            hostname: None,
            name: None,
        };
        let mut sink = Vec::new();
        assert!(create(&mut sink, &store, &new).is_err());
    }
}
