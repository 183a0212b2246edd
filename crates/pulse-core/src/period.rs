//! Half-open time intervals.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{format_timestamp, parse_timestamp};
use crate::types::ValidationError;

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawPeriod> for Period {
    type Error = ValidationError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl Period {
    /// Creates a period, rejecting `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvertedPeriod {
                start: format_timestamp(start),
                end: format_timestamp(end),
            });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// True when `[start, end]` of a span lies entirely inside this period.
    pub fn contains_span(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && end <= self.end
    }

    /// The overlap of a span with this period, if any.
    ///
    /// Zero-length spans overlap when they sit inside `[start, end)`.
    pub fn clip(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if start == end {
            return (self.start <= start && start < self.end).then_some((start, end));
        }
        let clipped_start = start.max(self.start);
        let clipped_end = end.min(self.end);
        (clipped_start < clipped_end).then_some((clipped_start, clipped_end))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    /// Parses `<start>/<end>` with RFC3339 timestamps.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((start, end)) = s.split_once('/') else {
            return Err(ValidationError::InvalidPeriod {
                value: s.to_string(),
            });
        };
        Self::new(parse_timestamp(start.trim())?, parse_timestamp(end.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, min, 0).unwrap()
    }

    #[test]
    fn new_rejects_inverted_bounds() {
        assert!(Period::new(at(10, 0), at(9, 0)).is_err());
        assert!(Period::new(at(10, 0), at(10, 0)).is_ok());
    }

    #[test]
    fn parses_and_displays_slash_form() {
        let period: Period = "2025-01-01T10:00:00Z/2025-01-01T11:00:00+00:00"
            .parse()
            .unwrap();
        assert_eq!(period.start(), at(10, 0));
        assert_eq!(period.end(), at(11, 0));
        assert_eq!(period.to_string(), "2025-01-01T10:00:00Z/2025-01-01T11:00:00Z");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        let err = "2025-01-01T10:00:00Z".parse::<Period>().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPeriod { .. }));
    }

    #[test]
    fn clip_handles_partial_and_disjoint_spans() {
        let period = Period::new(at(10, 0), at(11, 0)).unwrap();

        assert_eq!(
            period.clip(at(9, 30), at(10, 30)),
            Some((at(10, 0), at(10, 30)))
        );
        assert_eq!(period.clip(at(11, 0), at(11, 30)), None);
        assert_eq!(period.clip(at(9, 0), at(10, 0)), None);
        assert_eq!(period.clip(at(10, 0), at(10, 0)), Some((at(10, 0), at(10, 0))));
        assert_eq!(period.clip(at(11, 0), at(11, 0)), None);
    }
}
