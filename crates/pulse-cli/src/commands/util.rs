//! Argument parsing shared by the subcommands.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::parse_timestamp;
use regex::Regex;
use serde_json::{Map, Value};

static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(second|minute|hour|day|week)s?\s+ago$")
        .expect("relative time pattern is valid")
});

/// Parses an RFC3339 timestamp or a relative time such as `"2 hours ago"`.
pub fn parse_time(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(ts) = parse_timestamp(s) {
        return Ok(ts);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s.trim()) else {
        anyhow::bail!(
            "invalid time {s:?}: use RFC3339 (e.g. 2025-01-15T10:30:00Z) or relative (e.g. '2 hours ago')"
        );
    };
    let n: i64 = caps[1]
        .parse()
        .with_context(|| format!("relative time {s:?} is out of range"))?;
    let unit = match &caps[2] {
        "second" => TimeDelta::try_seconds(n),
        "minute" => TimeDelta::try_minutes(n),
        "hour" => TimeDelta::try_hours(n),
        "day" => TimeDelta::try_days(n),
        _ => TimeDelta::try_weeks(n),
    };
    unit.and_then(|delta| now.checked_sub_signed(delta))
        .with_context(|| format!("relative time {s:?} is out of range"))
}

pub fn parse_optional_time(s: Option<&str>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_time(s, now)).transpose()
}

/// Parses event data given on the command line.
pub fn parse_data(s: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(s).context("event data is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("event data must be a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_time("2025-06-01T14:00:00+02:00", now()).unwrap();
        assert_eq!(ts, now());
    }

    #[test]
    fn parses_relative_times() {
        assert_eq!(
            parse_time("90 seconds ago", now()).unwrap(),
            now() - TimeDelta::seconds(90)
        );
        assert_eq!(
            parse_time("1 day ago", now()).unwrap(),
            now() - TimeDelta::days(1)
        );
        assert_eq!(
            parse_time("2 weeks ago", now()).unwrap(),
            now() - TimeDelta::weeks(2)
        );
    }

    #[test]
    fn rejects_garbage_and_overflow() {
        assert!(parse_time("yesterday", now()).is_err());
        assert!(parse_time("99999999999999 weeks ago", now()).is_err());
        assert_eq!(parse_optional_time(None, now()).unwrap(), None);
    }

    #[test]
    fn data_must_be_an_object() {
        assert_eq!(parse_data(r#"{"app": "vim"}"#).unwrap()["app"], "vim");
        assert!(parse_data("[1]").is_err());
        assert!(parse_data("{").is_err());
    }
}
