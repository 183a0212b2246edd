//! The storage contract the core reads and writes through.
//!
//! Implementations must be `Send + Sync`: the query interpreter reads from
//! several periods in parallel and the heartbeat coalescer writes from
//! whichever thread delivers a heartbeat. Calls are synchronous and may block.
//!
//! # Range semantics
//!
//! `get_events` returns events whose span overlaps `[start, end)`, newest
//! first. Spans crossing either bound are clipped to it, so callers never see
//! time outside the requested range.

mod memory;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Bucket, BucketId, Event, EventId};

pub use memory::MemoryDatastore;

/// Errors surfaced by a datastore.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(BucketId),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(BucketId),

    #[error("event {event} not found in bucket {bucket}")]
    EventNotFound { bucket: BucketId, event: EventId },

    /// The backend cannot be reached right now.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("datastore backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// CRUD and range queries over buckets and their events.
pub trait Datastore: Send + Sync {
    /// Stores bucket metadata. Fails if the id is taken.
    fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, DatastoreError>;

    /// Deletes a bucket and all of its events.
    fn delete_bucket(&self, bucket: &BucketId) -> Result<(), DatastoreError>;

    fn get_bucket_metadata(&self, bucket: &BucketId) -> Result<Bucket, DatastoreError>;

    /// Lists every bucket, ordered by id.
    fn buckets(&self) -> Result<Vec<Bucket>, DatastoreError>;

    /// Events overlapping `[start, end)`, newest first, clipped to the range.
    ///
    /// Open bounds are unbounded; `limit` caps the number returned.
    fn get_events(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DatastoreError>;

    /// Number of events overlapping `[start, end)`.
    fn get_event_count(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<usize, DatastoreError>;

    fn get_event(&self, bucket: &BucketId, event: EventId) -> Result<Event, DatastoreError>;

    /// Appends events, returning the identifiers assigned to them in order.
    fn insert_events(
        &self,
        bucket: &BucketId,
        events: &[Event],
    ) -> Result<Vec<EventId>, DatastoreError>;

    /// Overwrites the stored event `event_id` in place.
    fn replace_event(
        &self,
        bucket: &BucketId,
        event_id: EventId,
        event: &Event,
    ) -> Result<(), DatastoreError>;

    fn delete_event(&self, bucket: &BucketId, event: EventId) -> Result<(), DatastoreError>;

    /// The most recent event in the bucket, if any.
    fn get_last_event(&self, bucket: &BucketId) -> Result<Option<Event>, DatastoreError> {
        Ok(self
            .get_events(bucket, None, None, Some(1))?
            .into_iter()
            .next())
    }
}

impl<T: Datastore + ?Sized> Datastore for std::sync::Arc<T> {
    fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, DatastoreError> {
        (**self).create_bucket(bucket)
    }

    fn delete_bucket(&self, bucket: &BucketId) -> Result<(), DatastoreError> {
        (**self).delete_bucket(bucket)
    }

    fn get_bucket_metadata(&self, bucket: &BucketId) -> Result<Bucket, DatastoreError> {
        (**self).get_bucket_metadata(bucket)
    }

    fn buckets(&self) -> Result<Vec<Bucket>, DatastoreError> {
        (**self).buckets()
    }

    fn get_events(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DatastoreError> {
        (**self).get_events(bucket, start, end, limit)
    }

    fn get_event_count(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<usize, DatastoreError> {
        (**self).get_event_count(bucket, start, end)
    }

    fn get_event(&self, bucket: &BucketId, event: EventId) -> Result<Event, DatastoreError> {
        (**self).get_event(bucket, event)
    }

    fn insert_events(
        &self,
        bucket: &BucketId,
        events: &[Event],
    ) -> Result<Vec<EventId>, DatastoreError> {
        (**self).insert_events(bucket, events)
    }

    fn replace_event(
        &self,
        bucket: &BucketId,
        event_id: EventId,
        event: &Event,
    ) -> Result<(), DatastoreError> {
        (**self).replace_event(bucket, event_id, event)
    }

    fn delete_event(&self, bucket: &BucketId, event: EventId) -> Result<(), DatastoreError> {
        (**self).delete_event(bucket, event)
    }

    fn get_last_event(&self, bucket: &BucketId) -> Result<Option<Event>, DatastoreError> {
        (**self).get_last_event(bucket)
    }
}

/// Clips an event to `[start, end)` with open bounds, as `get_events` requires.
///
/// Returns `None` when the event does not overlap the range.
pub fn clip_to_range(
    event: &Event,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<Event> {
    let range = crate::Period::new(
        start.unwrap_or(DateTime::<Utc>::MIN_UTC),
        end.unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
    .ok()?;
    let (clipped_start, clipped_end) = range.clip(event.timestamp, event.end())?;
    let mut clipped = event.clone();
    clipped.set_span(clipped_start, clipped_end);
    Some(clipped)
}
