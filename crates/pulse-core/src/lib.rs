//! Core domain logic for activity tracking.
//!
//! This crate contains:
//! - The event model: timestamped intervals with JSON payloads, grouped into buckets
//! - Transforms: pure functions over event sequences (intersection, merging, flooding,
//!   categorization, rollups)
//! - Heartbeat coalescing: folding liveness pulses into stored events
//! - The datastore contract the rest of the system reads and writes through

mod bucket;
pub mod coalescer;
pub mod datastore;
mod event;
mod period;
pub mod transform;
mod types;

pub use bucket::Bucket;
pub use coalescer::{CoalescerConfig, HeartbeatCoalescer, HeartbeatError};
pub use datastore::{Datastore, DatastoreError, MemoryDatastore};
pub use event::{
    Event, canonical_value, data_eq, delta_to_secs, format_timestamp, parse_timestamp,
    secs_to_delta, values_eq,
};
pub use period::Period;
pub use transform::TransformError;
pub use types::{BucketId, BucketType, EventId, ValidationError};
