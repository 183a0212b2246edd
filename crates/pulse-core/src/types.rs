//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Event durations cannot be negative.
    #[error("duration must be non-negative, got {seconds}s")]
    NegativeDuration { seconds: f64 },

    /// Event durations must be finite numbers.
    #[error("duration must be a finite number of seconds")]
    NonFiniteDuration,

    /// Event data must be a JSON object.
    #[error("event data must be a JSON object, got {found}")]
    DataNotObject { found: &'static str },

    /// A timestamp could not be parsed as RFC3339.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// A period ends before it starts.
    #[error("period end {end} is before start {start}")]
    InvertedPeriod { start: String, end: String },

    /// A period string was not of the form `<start>/<end>`.
    #[error("invalid period {value:?}, expected <start>/<end>")]
    InvalidPeriod { value: String },

    /// The event could not be decoded from JSON.
    #[error("malformed event: {message}")]
    MalformedEvent { message: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated bucket identifier.
    ///
    /// Bucket IDs must be non-empty strings and are unique per datastore
    /// (e.g., "aw-watcher-window_laptop").
    BucketId, "bucket ID"
);

define_string_id!(
    /// A validated bucket type tag.
    ///
    /// The type describes the event schema convention used by a bucket
    /// (e.g., "currentwindow", "afkstatus").
    BucketType, "bucket type"
);

/// Storage-assigned event identifier.
///
/// Identifiers are opaque to the core: they are only compared and handed back
/// to the datastore for replace and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
