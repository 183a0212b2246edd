//! Timestamped activity intervals.
//!
//! An [`Event`] is a span of time (`timestamp` plus a non-negative `duration`)
//! carrying an arbitrary JSON object as its payload. The wire form is:
//!
//! ```json
//! {"id": 12, "timestamp": "2025-01-01T10:00:00Z", "duration": 5.0, "data": {"app": "firefox"}}
//! ```
//!
//! `id` is assigned by storage and omitted for events that were never stored.
//! Equality ignores `id`: two events are equal when their timestamp, duration
//! and data are equal, with data compared by value regardless of key order.
//! Numbers compare by value, so `{"n": 1}` and `{"n": 1.0}` are the same data.

use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::types::{EventId, ValidationError};

/// A timestamped activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    pub(crate) id: Option<EventId>,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) duration: TimeDelta,
    pub(crate) data: Map<String, Value>,
}

impl Event {
    /// Creates an event, normalizing the timestamp to UTC.
    ///
    /// Fails when `duration_secs` is negative or not finite.
    pub fn new<Tz: TimeZone>(
        timestamp: DateTime<Tz>,
        duration_secs: f64,
        data: Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let duration = secs_to_delta(duration_secs)?;
        Ok(Self::from_parts(timestamp.with_timezone(&Utc), duration, data))
    }

    /// Creates an event from an already-validated duration.
    ///
    /// Negative durations are clamped to zero.
    pub fn from_parts(
        timestamp: DateTime<Utc>,
        duration: TimeDelta,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            duration: duration.max(TimeDelta::zero()),
            data,
        }
    }

    /// Decodes an event from its canonical JSON form.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let raw: RawEvent =
            serde_json::from_value(value).map_err(|e| ValidationError::MalformedEvent {
                message: e.to_string(),
            })?;
        Self::try_from(raw)
    }

    /// Encodes the event in its canonical JSON form.
    pub fn to_json(&self) -> Value {
        let raw = RawEvent::from(self.clone());
        serde_json::to_value(raw).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub const fn id(&self) -> Option<EventId> {
        self.id
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub const fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// Duration in (fractional) seconds.
    pub fn duration_secs(&self) -> f64 {
        delta_to_secs(self.duration)
    }

    pub const fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// The instant this event's span ends.
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Replaces the span, keeping id and data.
    pub(crate) fn set_span(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.timestamp = start;
        self.duration = (end - start).max(TimeDelta::zero());
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.duration == other.duration
            && data_eq(&self.data, &other.data)
    }
}

/// Compares two data maps, treating integral floats as the integers they hold.
pub fn data_eq(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| values_eq(value, other)))
}

/// Deep JSON equality with numbers compared by value.
pub fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => canonical_number(x) == canonical_number(y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => data_eq(x, y),
        _ => a == b,
    }
}

/// Rewrites every number in `value` into its canonical form.
///
/// Values that are [`values_eq`] serialize to the same text once canonical.
pub fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonical_value(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// 2^63, the first float outside the `i64` range.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn canonical_number(n: &Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&f) => {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "integral and range-checked above"
            )]
            let int = f as i64;
            Number::from(int)
        }
        _ => n.clone(),
    }
}

/// Converts seconds into a `TimeDelta` with microsecond precision.
pub fn secs_to_delta(secs: f64) -> Result<TimeDelta, ValidationError> {
    if !secs.is_finite() {
        return Err(ValidationError::NonFiniteDuration);
    }
    if secs < 0.0 {
        return Err(ValidationError::NegativeDuration { seconds: secs });
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "float to int casts saturate; durations past i64 micros are not meaningful"
    )]
    let micros = (secs * 1_000_000.0).round() as i64;
    Ok(TimeDelta::microseconds(micros))
}

/// Converts a `TimeDelta` into fractional seconds.
#[expect(
    clippy::cast_precision_loss,
    reason = "seconds beyond 2^52 are not meaningful activity durations"
)]
pub fn delta_to_secs(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1_000_000_000.0
}

/// Formats a timestamp the way events are encoded on the wire.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an RFC3339 timestamp with any offset, normalizing to UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Wire representation of an [`Event`].
#[derive(Debug, Serialize, Deserialize)]
struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<EventId>,
    timestamp: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    data: Option<Value>,
}

impl TryFrom<RawEvent> for Event {
    type Error = ValidationError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&raw.timestamp)?;
        let data = match raw.data {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ValidationError::DataNotObject {
                    found: json_type_name(&other),
                });
            }
        };
        let mut event = Self::new(timestamp, raw.duration, data)?;
        event.id = raw.id;
        Ok(event)
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            timestamp: format_timestamp(event.timestamp),
            duration: delta_to_secs(event.duration),
            data: Some(Value::Object(event.data)),
        }
    }
}

/// Name of a JSON value's type, for error messages.
pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn new_normalizes_timestamp_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let event = Event::new(local, 1.5, Map::new()).unwrap();

        assert_eq!(
            event.timestamp(),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(event.duration(), TimeDelta::milliseconds(1500));
    }

    #[test]
    fn new_rejects_negative_and_non_finite_durations() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Event::new(ts, -1.0, Map::new()).unwrap_err(),
            ValidationError::NegativeDuration { seconds: -1.0 }
        );
        assert_eq!(
            Event::new(ts, f64::NAN, Map::new()).unwrap_err(),
            ValidationError::NonFiniteDuration
        );
    }

    #[test]
    fn equality_ignores_id_and_key_order() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = Event::new(ts, 3.0, data(json!({"app": "vim", "title": "main.rs"}))).unwrap();
        let b = Event::new(ts, 3.0, data(json!({"title": "main.rs", "app": "vim"})))
            .unwrap()
            .with_id(EventId::new(9));

        assert_eq!(a, b);

        let c = Event::new(ts, 3.0, data(json!({"app": "vim", "title": "lib.rs"}))).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn seconds_convert_at_microsecond_precision() {
        assert_eq!(secs_to_delta(1.5).unwrap(), TimeDelta::milliseconds(1500));
        assert_eq!(secs_to_delta(0.000_000_4).unwrap(), TimeDelta::zero());
        assert!((delta_to_secs(TimeDelta::microseconds(2_500_001)) - 2.500_001).abs() < 1e-9);
        assert!(secs_to_delta(f64::INFINITY).is_err());
    }

    #[test]
    fn integral_floats_equal_integers() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = Event::new(ts, 1.0, data(json!({"n": 1, "xs": [2, {"k": 3}]}))).unwrap();
        let b = Event::new(ts, 1.0, data(json!({"n": 1.0, "xs": [2.0, {"k": 3.0}]}))).unwrap();
        assert_eq!(a, b);

        let c = Event::new(ts, 1.0, data(json!({"n": 1.5, "xs": [2, {"k": 3}]}))).unwrap();
        assert_ne!(a, c);
        assert!(!values_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn canonical_values_serialize_identically() {
        let a = canonical_value(&json!({"n": 1, "f": 0.5, "xs": [-2]}));
        let b = canonical_value(&json!({"n": 1.0, "f": 0.5, "xs": [-2.0]}));
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), r#"{"f":0.5,"n":1,"xs":[-2]}"#);
    }

    #[test]
    fn json_roundtrip_uses_canonical_shape() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let event = Event::new(ts, 5.0, data(json!({"app": "firefox"}))).unwrap();

        let encoded = event.to_json();
        assert_eq!(
            encoded,
            json!({"timestamp": "2025-01-01T10:00:00Z", "duration": 5.0, "data": {"app": "firefox"}})
        );

        let decoded = Event::from_json(encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_accepts_offsets_and_keeps_id() {
        let decoded = Event::from_json(json!({
            "id": 3,
            "timestamp": "2025-01-01T12:00:00+02:00",
            "duration": 0,
            "data": {}
        }))
        .unwrap();

        assert_eq!(decoded.id(), Some(EventId::new(3)));
        assert_eq!(
            decoded.timestamp(),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn decode_rejects_non_object_data() {
        let err = Event::from_json(json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "duration": 1,
            "data": [1, 2]
        }))
        .unwrap_err();

        assert_eq!(err, ValidationError::DataNotObject { found: "array" });
    }

    #[test]
    fn decode_rejects_bad_timestamp() {
        let result = Event::from_json(json!({"timestamp": "yesterday", "duration": 1}));
        assert!(matches!(
            result,
            Err(ValidationError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn end_adds_duration() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let event = Event::new(ts, 90.0, Map::new()).unwrap();
        assert_eq!(event.end(), ts + TimeDelta::seconds(90));
    }
}
