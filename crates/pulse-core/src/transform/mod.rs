//! Pure transforms over ordered event sequences.
//!
//! Every function here takes events by reference or value and returns new
//! events; none of them hold state, so they can run concurrently on
//! independent inputs. Inputs are expected in ascending timestamp order
//! unless a function says otherwise.

mod chunk;
mod classify;
mod filter;
mod flood;
mod heartbeat;
mod intersect;
mod merge;
mod simplify;
mod sort;
mod split_url;

use thiserror::Error;

pub use chunk::{ChunkNode, ChunkTree, NodeId, chunk};
pub use classify::{CATEGORY_KEY, Category, Rule, TAGS_KEY, UNCATEGORIZED, categorize, tag};
pub use filter::{filter_keyvals, filter_keyvals_regex};
pub use flood::flood;
pub use heartbeat::{heartbeat_merge, heartbeat_reduce};
pub use intersect::{
    filter_period_intersect, filter_period_intersect_events, period_union, period_union_events,
    union, union_no_overlap,
};
pub use merge::{SUBEVENTS_KEY, chunk_events_by_key, merge_events, merge_events_by_keys};
pub use simplify::simplify_string;
pub use sort::{concat, limit_events, sort_by_duration, sort_by_timestamp, sum_durations};
pub use split_url::split_url_events;

/// Errors raised by transforms that validate their arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// `limit_events` was given a negative count.
    #[error("limit must be non-negative, got {limit}")]
    NegativeLimit { limit: i64 },

    /// A pulsetime or other time span was negative.
    #[error("{field} must be non-negative")]
    NegativeSpan { field: &'static str },

    /// A regular expression failed to compile.
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    /// A categorization rule could not be interpreted.
    #[error("invalid rule: {message}")]
    InvalidRule { message: String },
}
