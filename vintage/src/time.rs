//! RFC3339 codec and millisecond-truncated revision instants.
//!
//! This module owns the bitemporal axis: [`Timestamp`] is the UTC,
//! millisecond-truncated instant used everywhere a revision time (`r`),
//! validity bound (`valid_from`/`valid_until`), or observation time (`t`)
//! is needed. [`recursive_coerce`] is the write-path string-to-time pass
//! described in the Design Notes: input strings that exactly match
//! `^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$` become timestamps; anything
//! else is left untouched, and the walk does not descend into a value it
//! has already converted.

use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TimeError;

/// Exact RFC3339 pattern accepted for coercion: `YYYY-MM-DDTHH:MM:SSZ`, no
/// fractional seconds, no offset other than `Z`.
static RFC3339_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").expect("static pattern is valid")
});

/// A UTC instant truncated to millisecond precision.
///
/// This is the bitemporal axis: revision instants (`r`), validity bounds
/// (`valid_from`/`valid_until`), and observation times (`t`) are all
/// represented as `Timestamp`. Construction always truncates, so two
/// `Timestamp`s are equal iff they refer to the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current UTC instant, truncated to milliseconds.
    ///
    /// A single batch write shares one `now`; callers should compute this
    /// once per batch and thread it through, never recompute mid-batch.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Truncates an arbitrary `DateTime<Utc>` to millisecond precision.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(3))
    }

    /// The documented "open" sentinel used in place of the source's
    /// `datetime.max` for an alias that has not been retired.
    ///
    /// See the Open Questions in the design notes: Rust's `DateTime<Utc>`
    /// has no platform-independent maximum, so this implementation fixes
    /// one and uses it consistently on every read and write.
    pub fn max_sentinel() -> Self {
        Self(
            Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
                .single()
                .expect("9999-12-31T23:59:59Z is representable")
                .trunc_subsecs(3),
        )
    }

    /// The symmetric "unbounded past" counterpart to [`Self::max_sentinel`],
    /// used as the default lower bound of a series read window.
    pub fn min_sentinel() -> Self {
        Self(
            Utc.with_ymd_and_hms(-9999, 1, 1, 0, 0, 0)
                .single()
                .expect("-9999-01-01T00:00:00Z is representable")
                .trunc_subsecs(3),
        )
    }

    /// Parses a string that exactly matches `YYYY-MM-DDTHH:MM:SSZ`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::NotRfc3339`] if the string does not match the
    /// exact pattern, or does not denote a valid calendar instant.
    pub fn parse_exact(s: &str) -> Result<Self, TimeError> {
        if !RFC3339_EXACT.is_match(s) {
            return Err(TimeError::NotRfc3339(s.to_string()));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| TimeError::NotRfc3339(s.to_string()))?
            .with_timezone(&Utc);
        Ok(Self::from_datetime(dt))
    }

    /// Returns `true` if `s` exactly matches the accepted RFC3339 pattern.
    pub fn matches_pattern(s: &str) -> bool {
        RFC3339_EXACT.is_match(s)
    }

    /// The underlying `chrono` instant.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Renders in canonical form: whole-second instants render without a
    /// fractional part (matching the exact input pattern); instants that
    /// carry sub-second precision (possible on values read back from
    /// storage, never on freshly parsed input) render with exactly three
    /// fractional digits.
    pub fn to_rfc3339(&self) -> String {
        if self.0.timestamp_subsec_millis() == 0 {
            self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
        } else {
            self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

/// Recursively walks a JSON value, replacing any string that exactly
/// matches the RFC3339 pattern with its canonical, millisecond-truncated
/// rendering. Descends into arrays and objects; does not re-visit a
/// string it has already normalized.
///
/// This is the generic coercion pass described in the Design Notes,
/// applied to `properties` (where an embedded date-like string is
/// normalized but stays a string) and is also what the validator relies
/// on to recognize series sample times before they are parsed into a
/// typed [`Timestamp`] for the series-index.
pub fn recursive_coerce(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if let Ok(ts) = Timestamp::parse_exact(s) {
                *s = ts.to_rfc3339();
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                recursive_coerce(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                recursive_coerce(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_rfc3339() {
        let ts = Timestamp::parse_exact("2020-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2020-01-01T00:00:00Z");
    }

    #[test]
    fn rejects_fractional_seconds_on_input() {
        assert!(Timestamp::parse_exact("2020-01-01T00:00:00.123Z").is_err());
    }

    #[test]
    fn rejects_non_zulu_offsets() {
        assert!(Timestamp::parse_exact("2020-01-01T00:00:00+01:00").is_err());
    }

    #[test]
    fn truncates_to_milliseconds() {
        let dt = "2020-01-01T00:00:00.123456Z".parse::<DateTime<Utc>>().unwrap();
        let ts = Timestamp::from_datetime(dt);
        assert_eq!(ts.to_rfc3339(), "2020-01-01T00:00:00.123Z");
    }

    #[test]
    fn recursive_coerce_walks_nested_structures() {
        let mut v = serde_json::json!({
            "a": "2020-01-01T00:00:00Z",
            "b": ["not a date", "2021-06-15T12:30:00Z"],
            "c": {"nested": "2022-02-02T02:02:02Z"},
            "d": 42,
        });
        recursive_coerce(&mut v);
        assert_eq!(v["a"], "2020-01-01T00:00:00Z");
        assert_eq!(v["b"][0], "not a date");
        assert_eq!(v["b"][1], "2021-06-15T12:30:00Z");
        assert_eq!(v["c"]["nested"], "2022-02-02T02:02:02Z");
        assert_eq!(v["d"], 42);
    }

    #[test]
    fn max_sentinel_is_after_any_realistic_instant() {
        let now = Timestamp::now();
        assert!(now < Timestamp::max_sentinel());
    }
}
