//! Runtime values of the query language.

use std::collections::BTreeMap;
use std::fmt;

use pulse_core::Event;
use serde::{Serialize, Serializer};
use serde_json::Value as Json;

use crate::error::QueryError;

/// Largest magnitude at which every integer is exactly representable in f64.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Number,
    String,
    Bool,
    List,
    Object,
    EventList,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Number => "Number",
            Self::String => "String",
            Self::Bool => "Bool",
            Self::List => "List",
            Self::Object => "Object",
            Self::EventList => "EventList",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    String(String),
    Bool(bool),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    EventList(Vec<Event>),
}

impl Value {
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Number(_) => Tag::Number,
            Self::String(_) => Tag::String,
            Self::Bool(_) => Tag::Bool,
            Self::List(_) => Tag::List,
            Self::Object(_) => Tag::Object,
            Self::EventList(_) => Tag::EventList,
        }
    }

    /// Converts to JSON. Event lists become arrays of event objects.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Json::String(s.clone()),
            Self::Bool(b) => Json::Bool(*b),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::EventList(events) => Json::Array(events.iter().map(Event::to_json).collect()),
        }
    }

    /// Converts from JSON. `null` has no query-language counterpart.
    pub fn from_json(json: Json) -> Result<Self, QueryError> {
        Ok(match json {
            Json::Null => return Err(QueryError::value("null is not a query value")),
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                    .collect::<Result<_, QueryError>>()?,
            ),
        })
    }
}

/// Whole numbers serialize as JSON integers; everything else as floats.
#[expect(
    clippy::cast_possible_truncation,
    reason = "guarded: n is whole and within the exact-integer range"
)]
fn as_exact_int(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT).then_some(n as i64)
}

fn number_to_json(n: f64) -> Json {
    as_exact_int(n).map_or_else(
        || serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number),
        Json::from,
    )
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => match as_exact_int(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Self::String(s) => serializer.serialize_str(s),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::List(items) => serializer.collect_seq(items),
            Self::Object(fields) => serializer.collect_map(fields),
            Self::EventList(events) => serializer.collect_seq(events.iter().map(Event::to_json)),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Vec<Event>> for Value {
    fn from(events: Vec<Event>) -> Self {
        Self::EventList(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn whole_numbers_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&Value::Number(3.0)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Value::Number(2.5)).unwrap(), "2.5");
        assert_eq!(Value::Number(-4.0).to_json(), json!(-4));
    }

    #[test]
    fn event_lists_serialize_as_event_objects() {
        let event = Event::new(Utc.timestamp_opt(0, 0).unwrap(), 1.5, serde_json::Map::new())
            .unwrap();
        let value = Value::EventList(vec![event]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!([{"timestamp": "1970-01-01T00:00:00Z", "duration": 1.5, "data": {}}])
        );
        assert_eq!(serde_json::to_value(&value).unwrap(), value.to_json());
    }

    #[test]
    fn from_json_maps_structures() {
        let value = Value::from_json(json!({"a": [1, "x", true]})).unwrap();
        let Value::Object(fields) = value else {
            panic!("expected object");
        };
        assert_eq!(
            fields["a"],
            Value::List(vec![Value::Number(1.0), "x".into(), true.into()])
        );
    }

    #[test]
    fn from_json_rejects_null() {
        assert!(Value::from_json(json!([null])).is_err());
    }

    #[test]
    fn tags_display_by_name() {
        assert_eq!(Value::EventList(vec![]).tag().to_string(), "EventList");
        assert_eq!(Value::Object(BTreeMap::new()).tag().to_string(), "Object");
    }
}
