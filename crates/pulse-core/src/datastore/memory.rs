//! In-memory datastore.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Datastore, DatastoreError, clip_to_range};
use crate::{Bucket, BucketId, Event, EventId};

#[derive(Debug)]
struct Entry {
    bucket: Bucket,
    events: BTreeMap<EventId, Event>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<BucketId, Entry>,
    next_id: i64,
}

/// A thread-safe datastore kept entirely in memory.
///
/// Event identifiers are assigned from one counter shared by all buckets.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    inner: RwLock<Inner>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn entry(&self, bucket: &BucketId) -> Result<&Entry, DatastoreError> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| DatastoreError::BucketNotFound(bucket.clone()))
    }

    fn entry_mut(&mut self, bucket: &BucketId) -> Result<&mut Entry, DatastoreError> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| DatastoreError::BucketNotFound(bucket.clone()))
    }
}

impl Datastore for MemoryDatastore {
    fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, DatastoreError> {
        let mut inner = self.inner.write();
        if inner.buckets.contains_key(&bucket.id) {
            return Err(DatastoreError::BucketAlreadyExists(bucket.id.clone()));
        }
        inner.buckets.insert(
            bucket.id.clone(),
            Entry {
                bucket: bucket.clone(),
                events: BTreeMap::new(),
            },
        );
        Ok(bucket.clone())
    }

    fn delete_bucket(&self, bucket: &BucketId) -> Result<(), DatastoreError> {
        self.inner
            .write()
            .buckets
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| DatastoreError::BucketNotFound(bucket.clone()))
    }

    fn get_bucket_metadata(&self, bucket: &BucketId) -> Result<Bucket, DatastoreError> {
        Ok(self.inner.read().entry(bucket)?.bucket.clone())
    }

    fn buckets(&self) -> Result<Vec<Bucket>, DatastoreError> {
        Ok(self
            .inner
            .read()
            .buckets
            .values()
            .map(|entry| entry.bucket.clone())
            .collect())
    }

    fn get_events(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DatastoreError> {
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Ok(Vec::new());
            }
        }
        let inner = self.inner.read();
        let entry = inner.entry(bucket)?;

        let mut events: Vec<Event> = entry
            .events
            .values()
            .filter_map(|event| clip_to_range(event, start, end))
            .collect();
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn get_event_count(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<usize, DatastoreError> {
        Ok(self.get_events(bucket, start, end, None)?.len())
    }

    fn get_event(&self, bucket: &BucketId, event: EventId) -> Result<Event, DatastoreError> {
        let inner = self.inner.read();
        inner
            .entry(bucket)?
            .events
            .get(&event)
            .cloned()
            .ok_or_else(|| DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event,
            })
    }

    fn insert_events(
        &self,
        bucket: &BucketId,
        events: &[Event],
    ) -> Result<Vec<EventId>, DatastoreError> {
        let mut inner = self.inner.write();
        let first_id = inner.next_id + 1;
        let entry = inner.entry_mut(bucket)?;

        let mut ids = Vec::with_capacity(events.len());
        for (offset, event) in (0_i64..).zip(events) {
            let id = EventId::new(first_id + offset);
            entry.events.insert(id, event.clone().with_id(id));
            ids.push(id);
        }
        inner.next_id = ids.last().map_or(inner.next_id, |id| id.value());
        Ok(ids)
    }

    fn replace_event(
        &self,
        bucket: &BucketId,
        event_id: EventId,
        event: &Event,
    ) -> Result<(), DatastoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(bucket)?;
        let slot = entry
            .events
            .get_mut(&event_id)
            .ok_or_else(|| DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event: event_id,
            })?;
        *slot = event.clone().with_id(event_id);
        Ok(())
    }

    fn delete_event(&self, bucket: &BucketId, event: EventId) -> Result<(), DatastoreError> {
        let mut inner = self.inner.write();
        inner
            .entry_mut(bucket)?
            .events
            .remove(&event)
            .map(|_| ())
            .ok_or_else(|| DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event,
            })
    }
}
