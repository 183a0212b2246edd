//! SQLite-backed datastore.
//!
//! # Thread Safety
//!
//! A `rusqlite::Connection` is `Send` but not `Sync`, so [`SqliteDatastore`]
//! keeps its connection behind a mutex and serializes every call. That is
//! enough for the [`Datastore`] contract, which only requires that readers
//! and writers can share one store.
//!
//! # Schema
//!
//! Buckets are keyed by an integer rowid; their public id is a unique TEXT
//! column. Events reference their bucket with `ON DELETE CASCADE`.
//!
//! Event spans are stored as INTEGER microseconds since the Unix epoch in
//! `starttime` and `endtime`, so range filters are plain integer comparisons.
//! Bucket creation times are TEXT in RFC 3339 form. Event payloads are stored
//! as JSON text.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_core::{
    Bucket, BucketId, Datastore, DatastoreError, Event, EventId, ValidationError,
    datastore::clip_to_range, format_timestamp, parse_timestamp,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde_json::Value;
use thiserror::Error;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp is out of range or unparseable.
    #[error("invalid timestamp in {context}: {value}")]
    InvalidTimestamp { context: String, value: String },
    /// A stored event payload is not a JSON object.
    #[error("invalid event data for event {event_id}: {message}")]
    InvalidEventData { event_id: i64, message: String },
    /// A stored bucket row fails validation.
    #[error("invalid bucket row {id}")]
    InvalidBucket {
        id: String,
        #[source]
        source: ValidationError,
    },
}

impl From<DbError> for DatastoreError {
    fn from(err: DbError) -> Self {
        let busy = matches!(
            &err,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if busy {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(Box::new(err))
        }
    }
}

fn backend(err: rusqlite::Error) -> DatastoreError {
    DbError::from(err).into()
}

/// A [`Datastore`] persisted in SQLite.
pub struct SqliteDatastore {
    conn: Mutex<Connection>,
}

impl SqliteDatastore {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        tracing::info!(path = %path.display(), "opened sqlite datastore");
        Ok(db)
    }

    /// Opens an in-memory database, destroyed when the store is dropped.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS buckets (
                key INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT,
                type TEXT NOT NULL,
                client TEXT NOT NULL,
                hostname TEXT NOT NULL,
                created TEXT NOT NULL
            );

            -- starttime/endtime: microseconds since the Unix epoch
            -- data: JSON object
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket_key INTEGER NOT NULL,
                starttime INTEGER NOT NULL,
                endtime INTEGER NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (bucket_key) REFERENCES buckets(key) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_events_bucket_start ON events(bucket_key, starttime);
            CREATE INDEX IF NOT EXISTS idx_events_bucket_end ON events(bucket_key, endtime);
            ",
        )?;
        Ok(())
    }
}

fn bucket_key(conn: &Connection, bucket: &BucketId) -> Result<i64, DatastoreError> {
    conn.query_row(
        "SELECT key FROM buckets WHERE id = ?",
        [bucket.as_str()],
        |row| row.get(0),
    )
    .optional()
    .map_err(backend)?
    .ok_or_else(|| DatastoreError::BucketNotFound(bucket.clone()))
}

fn micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn from_micros(value: i64, context: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::<Utc>::from_timestamp_micros(value).ok_or_else(|| DbError::InvalidTimestamp {
        context: context.to_string(),
        value: value.to_string(),
    })
}

/// Columns read for every event query, in [`event_from_row`] order.
const EVENT_COLUMNS: &str = "id, starttime, endtime, data";

/// Overlap with `[?2, ?3)`, matching [`clip_to_range`]: spans must share a
/// non-empty interval; zero-length events count when `?2 <= t < ?3`.
const OVERLAPS: &str = "
    bucket_key = ?1
    AND (
        (starttime < ?3 AND endtime > ?2)
        OR (starttime = endtime AND starttime >= ?2 AND starttime < ?3)
    )";

struct EventRow {
    id: i64,
    start: i64,
    end: i64,
    data: String,
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        data: row.get(3)?,
    })
}

impl EventRow {
    fn into_event(self) -> Result<Event, DbError> {
        let context = format!("event {}", self.id);
        let start = from_micros(self.start, &context)?;
        let end = from_micros(self.end, &context)?;
        let data = match serde_json::from_str::<Value>(&self.data) {
            Ok(Value::Object(data)) => data,
            Ok(_) => {
                return Err(DbError::InvalidEventData {
                    event_id: self.id,
                    message: "payload is not a JSON object".to_string(),
                });
            }
            Err(e) => {
                return Err(DbError::InvalidEventData {
                    event_id: self.id,
                    message: e.to_string(),
                });
            }
        };
        Ok(Event::from_parts(start, end - start, data).with_id(EventId::new(self.id)))
    }
}

struct BucketRow {
    id: String,
    name: Option<String>,
    kind: String,
    client: String,
    hostname: String,
    created: String,
}

fn bucket_from_row(row: &Row<'_>) -> rusqlite::Result<BucketRow> {
    Ok(BucketRow {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        client: row.get(3)?,
        hostname: row.get(4)?,
        created: row.get(5)?,
    })
}

impl BucketRow {
    fn into_bucket(self) -> Result<Bucket, DbError> {
        let created = parse_timestamp(&self.created).map_err(|_| DbError::InvalidTimestamp {
            context: format!("bucket {}", self.id),
            value: self.created.clone(),
        })?;
        let bucket = Bucket::new(&self.id, &self.kind, self.client, self.hostname, created)
            .map_err(|source| DbError::InvalidBucket {
                id: self.id.clone(),
                source,
            })?;
        Ok(match self.name {
            Some(name) => bucket.with_name(name),
            None => bucket,
        })
    }
}

const BUCKET_COLUMNS: &str = "id, name, type, client, hostname, created";

/// Integer bounds for an optional range; open ends become the integer extremes.
fn bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> (i64, i64) {
    (
        start.map_or(i64::MIN, micros),
        end.map_or(i64::MAX, micros),
    )
}

fn encode_data(event: &Event) -> String {
    Value::Object(event.data().clone()).to_string()
}

impl Datastore for SqliteDatastore {
    fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, DatastoreError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO buckets (id, name, type, client, hostname, created) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                bucket.id.as_str(),
                bucket.name,
                bucket.kind.as_str(),
                bucket.client,
                bucket.hostname,
                format_timestamp(bucket.created),
            ],
        );
        match result {
            Ok(_) => {
                tracing::info!(bucket = %bucket.id, "created bucket");
                Ok(bucket.clone())
            }
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(DatastoreError::BucketAlreadyExists(bucket.id.clone()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn delete_bucket(&self, bucket: &BucketId) -> Result<(), DatastoreError> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM buckets WHERE id = ?", [bucket.as_str()])
            .map_err(backend)?;
        if deleted == 0 {
            return Err(DatastoreError::BucketNotFound(bucket.clone()));
        }
        tracing::info!(bucket = %bucket, "deleted bucket");
        Ok(())
    }

    fn get_bucket_metadata(&self, bucket: &BucketId) -> Result<Bucket, DatastoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE id = ?"),
                [bucket.as_str()],
                bucket_from_row,
            )
            .optional()
            .map_err(backend)?
            .ok_or_else(|| DatastoreError::BucketNotFound(bucket.clone()))?;
        Ok(row.into_bucket()?)
    }

    fn buckets(&self) -> Result<Vec<Bucket>, DatastoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {BUCKET_COLUMNS} FROM buckets ORDER BY id ASC"))
            .map_err(backend)?;
        let rows = stmt.query_map([], bucket_from_row).map_err(backend)?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row.map_err(backend)?.into_bucket()?);
        }
        Ok(buckets)
    }

    fn get_events(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DatastoreError> {
        let conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Ok(Vec::new());
            }
        }
        let (lo, hi) = bounds(start, end);
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE {OVERLAPS}
                 ORDER BY starttime DESC, id DESC
                 LIMIT ?4"
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![key, lo, hi, limit], event_from_row)
            .map_err(backend)?;
        let mut events = Vec::new();
        for row in rows {
            let event = row.map_err(backend)?.into_event()?;
            if let Some(clipped) = clip_to_range(&event, start, end) {
                events.push(clipped);
            }
        }
        Ok(events)
    }

    fn get_event_count(
        &self,
        bucket: &BucketId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<usize, DatastoreError> {
        let conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Ok(0);
            }
        }
        let (lo, hi) = bounds(start, end);
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM events WHERE {OVERLAPS}"),
                params![key, lo, hi],
                |row| row.get(0),
            )
            .map_err(backend)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn get_event(&self, bucket: &BucketId, event: EventId) -> Result<Event, DatastoreError> {
        let conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ? AND bucket_key = ?"),
                params![event.value(), key],
                event_from_row,
            )
            .optional()
            .map_err(backend)?
            .ok_or_else(|| DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event,
            })?;
        Ok(row.into_event()?)
    }

    fn insert_events(
        &self,
        bucket: &BucketId,
        events: &[Event],
    ) -> Result<Vec<EventId>, DatastoreError> {
        let mut conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        let tx = conn.transaction().map_err(backend)?;
        let mut ids = Vec::with_capacity(events.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO events (bucket_key, starttime, endtime, data) VALUES (?, ?, ?, ?)",
                )
                .map_err(backend)?;
            for event in events {
                stmt.execute(params![
                    key,
                    micros(event.timestamp()),
                    micros(event.end()),
                    encode_data(event),
                ])
                .map_err(backend)?;
                ids.push(EventId::new(tx.last_insert_rowid()));
            }
        }
        tx.commit().map_err(backend)?;
        tracing::debug!(bucket = %bucket, count = ids.len(), "inserted events");
        Ok(ids)
    }

    fn replace_event(
        &self,
        bucket: &BucketId,
        event_id: EventId,
        event: &Event,
    ) -> Result<(), DatastoreError> {
        let conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        let updated = conn
            .execute(
                "UPDATE events SET starttime = ?, endtime = ?, data = ? WHERE id = ? AND bucket_key = ?",
                params![
                    micros(event.timestamp()),
                    micros(event.end()),
                    encode_data(event),
                    event_id.value(),
                    key,
                ],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event: event_id,
            });
        }
        Ok(())
    }

    fn delete_event(&self, bucket: &BucketId, event: EventId) -> Result<(), DatastoreError> {
        let conn = self.conn.lock();
        let key = bucket_key(&conn, bucket)?;
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE id = ? AND bucket_key = ?",
                params![event.value(), key],
            )
            .map_err(backend)?;
        if deleted == 0 {
            return Err(DatastoreError::EventNotFound {
                bucket: bucket.clone(),
                event,
            });
        }
        Ok(())
    }
}
