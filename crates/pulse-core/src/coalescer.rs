//! Heartbeat coalescing.
//!
//! Watchers report activity as a stream of heartbeats. The [`HeartbeatCoalescer`]
//! folds them into stored events: a heartbeat with the same data as the last
//! stored event, arriving within `pulsetime` of its end, extends that event in
//! place; anything else starts a new event.
//!
//! # Per-bucket state
//!
//! Each bucket has its own slot guarded by its own mutex:
//!
//! - `Unloaded`: nothing cached; the next heartbeat reads the last event from
//!   the datastore.
//! - `Idle`: the bucket has no events.
//! - `Active(event)`: the last stored event, still open to merging until a
//!   non-mergeable heartbeat supersedes it.
//!
//! The read-last / decide / write sequence runs under the slot's lock, so two
//! heartbeats for one bucket can never both merge into the same stale event.
//! Different buckets never contend.
//!
//! A heartbeat older than the cached event is stored as its own event and
//! never merged; the cached event keeps accepting merges.
//!
//! # Retries
//!
//! Merges replace the stored event by identifier instead of appending, and a
//! merged event ends at the later of the two ends. Replaying a heartbeat that
//! was already applied therefore leaves the store unchanged. Any datastore
//! failure drops the cached slot so the next attempt re-reads from storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::datastore::{Datastore, DatastoreError};
use crate::transform::heartbeat_merge;
use crate::{BucketId, Event};

/// Errors from heartbeat coalescing.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    /// The bucket's lock was not acquired within the configured timeout.
    #[error("timed out after {timeout:?} waiting for heartbeat lock on bucket {bucket}")]
    LockTimeout { bucket: BucketId, timeout: Duration },

    /// The datastore returned a last event without an identifier.
    #[error("last event in bucket {bucket} has no identifier")]
    MissingEventId { bucket: BucketId },
}

/// Coalescer settings.
#[derive(Debug, Clone, Default)]
pub struct CoalescerConfig {
    /// How long to wait for a bucket's lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
enum BucketState {
    #[default]
    Unloaded,
    Idle,
    Active(Event),
}

type Slot = Arc<Mutex<BucketState>>;

/// Merges heartbeats into stored events, one critical section per bucket.
pub struct HeartbeatCoalescer<D: Datastore + ?Sized> {
    store: Arc<D>,
    config: CoalescerConfig,
    slots: Mutex<HashMap<BucketId, Slot>>,
}

impl<D: Datastore + ?Sized> HeartbeatCoalescer<D> {
    pub fn new(store: Arc<D>, config: CoalescerConfig) -> Self {
        Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    /// Applies one heartbeat and returns the stored event it produced.
    ///
    /// The returned event is either the newly inserted heartbeat or the
    /// merged last event, carrying its storage identifier.
    pub fn heartbeat(
        &self,
        bucket: &BucketId,
        heartbeat: Event,
        pulsetime: TimeDelta,
    ) -> Result<Event, HeartbeatError> {
        let slot = self.slot(bucket);
        let mut state = self.lock(&slot, bucket)?;
        let result = self.apply(bucket, &mut state, heartbeat, pulsetime);
        if result.is_err() {
            *state = BucketState::Unloaded;
        }
        result
    }

    /// Applies heartbeats in order under a single lock acquisition.
    ///
    /// Returns the stored event produced by the final heartbeat.
    pub fn heartbeat_many(
        &self,
        bucket: &BucketId,
        heartbeats: Vec<Event>,
        pulsetime: TimeDelta,
    ) -> Result<Option<Event>, HeartbeatError> {
        let slot = self.slot(bucket);
        let mut state = self.lock(&slot, bucket)?;
        let mut last = None;
        for heartbeat in heartbeats {
            match self.apply(bucket, &mut state, heartbeat, pulsetime) {
                Ok(event) => last = Some(event),
                Err(err) => {
                    *state = BucketState::Unloaded;
                    return Err(err);
                }
            }
        }
        Ok(last)
    }

    /// Drops the cached last event for `bucket`.
    ///
    /// Call this after modifying the bucket outside the coalescer, e.g. when
    /// it was deleted and recreated.
    pub fn forget(&self, bucket: &BucketId) -> Result<(), HeartbeatError> {
        let slot = self.slot(bucket);
        *self.lock(&slot, bucket)? = BucketState::Unloaded;
        Ok(())
    }

    fn slot(&self, bucket: &BucketId) -> Slot {
        Arc::clone(self.slots.lock().entry(bucket.clone()).or_default())
    }

    fn lock<'a>(
        &self,
        slot: &'a Slot,
        bucket: &BucketId,
    ) -> Result<MutexGuard<'a, BucketState>, HeartbeatError> {
        match self.config.lock_timeout {
            None => Ok(slot.lock()),
            Some(timeout) => slot
                .try_lock_for(timeout)
                .ok_or_else(|| HeartbeatError::LockTimeout {
                    bucket: bucket.clone(),
                    timeout,
                }),
        }
    }

    fn apply(
        &self,
        bucket: &BucketId,
        state: &mut BucketState,
        heartbeat: Event,
        pulsetime: TimeDelta,
    ) -> Result<Event, HeartbeatError> {
        if matches!(state, BucketState::Unloaded) {
            *state = match self.store.get_last_event(bucket)? {
                Some(last) => BucketState::Active(last),
                None => BucketState::Idle,
            };
            tracing::trace!(bucket = %bucket, "loaded last event");
        }

        if let BucketState::Active(last) = &*state {
            if heartbeat.timestamp < last.timestamp {
                tracing::warn!(
                    bucket = %bucket,
                    heartbeat = %heartbeat.timestamp,
                    last = %last.timestamp,
                    "heartbeat older than last event, storing it unmerged"
                );
                // The cached event stays the newest one in the bucket.
                return self.insert(bucket, heartbeat);
            }

            if let Some(merged) = heartbeat_merge(last, &heartbeat, pulsetime) {
                let id = last.id.ok_or_else(|| HeartbeatError::MissingEventId {
                    bucket: bucket.clone(),
                })?;
                self.store.replace_event(bucket, id, &merged)?;
                let merged = merged.with_id(id);
                tracing::debug!(bucket = %bucket, event = %id, duration = merged.duration_secs(), "merged heartbeat");
                *state = BucketState::Active(merged.clone());
                return Ok(merged);
            }
        }

        let stored = self.insert(bucket, heartbeat)?;
        *state = BucketState::Active(stored.clone());
        Ok(stored)
    }

    fn insert(&self, bucket: &BucketId, heartbeat: Event) -> Result<Event, HeartbeatError> {
        let ids = self
            .store
            .insert_events(bucket, std::slice::from_ref(&heartbeat))?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| HeartbeatError::MissingEventId {
                bucket: bucket.clone(),
            })?;
        tracing::debug!(bucket = %bucket, event = %id, "inserted heartbeat as new event");
        Ok(heartbeat.with_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use crate::transform::testing::{event, ts};
    use crate::Bucket;
    use serde_json::json;

    fn setup() -> (HeartbeatCoalescer<MemoryDatastore>, BucketId) {
        let store = Arc::new(MemoryDatastore::new());
        let bucket = Bucket::new("window", "currentwindow", "tests", "host", ts(0)).unwrap();
        store.create_bucket(&bucket).unwrap();
        (
            HeartbeatCoalescer::new(store, CoalescerConfig::default()),
            bucket.id,
        )
    }

    #[test]
    fn merges_heartbeats_within_pulsetime() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(10);

        let first = coalescer
            .heartbeat(&bucket, event(0, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        let second = coalescer
            .heartbeat(&bucket, event(5, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.timestamp(), ts(0));
        assert_eq!(second.duration(), TimeDelta::seconds(5));

        let stored = coalescer.store().get_events(&bucket, None, None, None).unwrap();
        assert_eq!(stored, vec![second]);
    }

    #[test]
    fn splits_heartbeats_past_pulsetime() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(3);

        coalescer
            .heartbeat(&bucket, event(0, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        coalescer
            .heartbeat(&bucket, event(5, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();

        assert_eq!(
            coalescer
                .store()
                .get_event_count(&bucket, None, None)
                .unwrap(),
            2
        );
    }

    #[test]
    fn data_change_starts_new_event() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(60);

        let a = coalescer
            .heartbeat(&bucket, event(0, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        let b = coalescer
            .heartbeat(&bucket, event(1, 0, json!({"app": "firefox"})), pulsetime)
            .unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn retried_heartbeat_does_not_duplicate() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(10);
        let hb = event(0, 0, json!({"app": "vim"}));

        coalescer.heartbeat(&bucket, hb.clone(), pulsetime).unwrap();
        coalescer.forget(&bucket).unwrap();
        coalescer.heartbeat(&bucket, hb, pulsetime).unwrap();

        assert_eq!(
            coalescer
                .store()
                .get_event_count(&bucket, None, None)
                .unwrap(),
            1
        );
    }

    #[test]
    fn cold_start_resumes_from_stored_event() {
        let store = Arc::new(MemoryDatastore::new());
        let bucket = Bucket::new("afk", "afkstatus", "tests", "host", ts(0)).unwrap();
        store.create_bucket(&bucket).unwrap();
        store
            .insert_events(&bucket.id, &[event(0, 30, json!({"status": "not-afk"}))])
            .unwrap();

        let coalescer = HeartbeatCoalescer::new(Arc::clone(&store), CoalescerConfig::default());
        let merged = coalescer
            .heartbeat(
                &bucket.id,
                event(35, 0, json!({"status": "not-afk"})),
                TimeDelta::seconds(10),
            )
            .unwrap();

        assert_eq!(merged.duration(), TimeDelta::seconds(35));
        assert_eq!(store.get_event_count(&bucket.id, None, None).unwrap(), 1);
    }

    #[test]
    fn older_heartbeat_is_stored_unmerged() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(10);

        let last = coalescer
            .heartbeat(&bucket, event(100, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        let late = coalescer
            .heartbeat(&bucket, event(50, 0, json!({"app": "firefox"})), pulsetime)
            .unwrap();

        assert_ne!(late.id(), last.id());
        assert_eq!(late.timestamp(), ts(50));
        assert_eq!(late.data()["app"], "firefox");
        assert_eq!(
            coalescer
                .store()
                .get_event_count(&bucket, None, None)
                .unwrap(),
            2
        );

        // The newer event is still the one heartbeats merge into.
        let extended = coalescer
            .heartbeat(&bucket, event(105, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        assert_eq!(extended.id(), last.id());
        assert_eq!(extended.duration(), TimeDelta::seconds(5));
    }

    #[test]
    fn older_heartbeat_with_same_data_is_not_merged() {
        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(60);

        coalescer
            .heartbeat(&bucket, event(100, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();
        coalescer
            .heartbeat(&bucket, event(90, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();

        let stored = coalescer.store().get_events(&bucket, None, None, None).unwrap();
        let starts: Vec<_> = stored.iter().map(Event::timestamp).collect();
        assert_eq!(starts, [ts(100), ts(90)]);
    }

    #[test]
    fn unknown_bucket_surfaces_datastore_error() {
        let (coalescer, _) = setup();
        let missing = BucketId::new("missing").unwrap();

        let err = coalescer
            .heartbeat(&missing, event(0, 0, json!({})), TimeDelta::seconds(1))
            .unwrap_err();
        assert!(matches!(
            err,
            HeartbeatError::Datastore(DatastoreError::BucketNotFound(_))
        ));
    }

    #[test]
    fn heartbeat_many_returns_final_event() {
        let (coalescer, bucket) = setup();
        let heartbeats = vec![
            event(0, 0, json!({"app": "vim"})),
            event(2, 0, json!({"app": "vim"})),
            event(4, 1, json!({"app": "vim"})),
        ];

        let last = coalescer
            .heartbeat_many(&bucket, heartbeats, TimeDelta::seconds(5))
            .unwrap()
            .unwrap();
        assert_eq!(last.duration(), TimeDelta::seconds(5));
    }

    #[test]
    fn concurrent_heartbeats_fold_into_one_event() {
        const THREADS: i64 = 8;
        const LAST: i64 = 200;

        let (coalescer, bucket) = setup();
        let pulsetime = TimeDelta::seconds(1000);
        coalescer
            .heartbeat(&bucket, event(0, 0, json!({"app": "vim"})), pulsetime)
            .unwrap();

        std::thread::scope(|scope| {
            for offset in 1..=THREADS {
                let (coalescer, bucket) = (&coalescer, &bucket);
                scope.spawn(move || {
                    for secs in (offset..=LAST).step_by(usize::try_from(THREADS).unwrap()) {
                        coalescer
                            .heartbeat(bucket, event(secs, 0, json!({"app": "vim"})), pulsetime)
                            .unwrap();
                    }
                });
            }
        });

        let stored = coalescer.store().get_events(&bucket, None, None, None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp(), ts(0));
        assert_eq!(stored[0].duration(), TimeDelta::seconds(LAST));
    }

    #[test]
    fn held_bucket_does_not_block_other_buckets() {
        let store = Arc::new(MemoryDatastore::new());
        for id in ["held", "free"] {
            store
                .create_bucket(&Bucket::new(id, "test", "tests", "host", ts(0)).unwrap())
                .unwrap();
        }
        let coalescer = HeartbeatCoalescer::new(
            store,
            CoalescerConfig {
                lock_timeout: Some(Duration::from_secs(5)),
            },
        );
        let held = BucketId::new("held").unwrap();
        let free = BucketId::new("free").unwrap();

        let slot = coalescer.slot(&held);
        let guard = slot.lock();
        let stored = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    coalescer.heartbeat(&free, event(0, 1, json!({})), TimeDelta::seconds(1))
                })
                .join()
                .unwrap()
        });
        drop(guard);

        assert!(stored.is_ok(), "{stored:?}");
        assert_eq!(
            coalescer
                .store()
                .get_event_count(&held, None, None)
                .unwrap(),
            0
        );
    }

    #[test]
    fn lock_timeout_reports_concurrency_error() {
        let store = Arc::new(MemoryDatastore::new());
        let bucket = Bucket::new("busy", "test", "tests", "host", ts(0)).unwrap();
        store.create_bucket(&bucket).unwrap();
        let coalescer = HeartbeatCoalescer::new(
            store,
            CoalescerConfig {
                lock_timeout: Some(Duration::from_millis(10)),
            },
        );

        let slot = coalescer.slot(&bucket.id);
        let _held = slot.lock();
        let err = coalescer
            .heartbeat(&bucket.id, event(0, 0, json!({})), TimeDelta::seconds(1))
            .unwrap_err();
        assert!(matches!(err, HeartbeatError::LockTimeout { .. }));
    }
}
