//! Buckets - typed streams of events from one data source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BucketId, BucketType, ValidationError};

/// Metadata describing a bucket.
///
/// A bucket owns its events; deleting it deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    #[serde(rename = "type")]
    pub kind: BucketType,
    pub client: String,
    pub hostname: String,
    pub created: DateTime<Utc>,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Bucket {
    /// Creates bucket metadata after validating the id and type.
    pub fn new(
        id: &str,
        kind: &str,
        client: impl Into<String>,
        hostname: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id: BucketId::new(id)?,
            kind: BucketType::new(kind)?,
            client: client.into(),
            hostname: hostname.into(),
            created,
            name: None,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
