// incident-core/src/core/time.rs
// ============================================================================
// Module: Incident Core Time Model
// Description: Canonical UTC timestamp representation for signals and audit
//              entries.
// Purpose: Provide a single, consistently formatted timestamp type.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every timestamp that crosses a serialization boundary (signals, audit
//! entries, config snapshots) is an RFC 3339 string in UTC. Wrapping
//! `OffsetDateTime` keeps ordering and formatting consistent across crates.

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// UTC timestamp, serialized as an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing `OffsetDateTime`, normalizing to UTC.
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the underlying `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset(&self) -> OffsetDateTime {
        self.0
    }

    /// Formats the timestamp as RFC 3339.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting fails (only possible for out-of-range
    /// years, which cannot occur for `now()`-derived values).
    pub fn to_rfc3339(&self) -> Result<String, time::error::Format> {
        self.0.format(&Rfc3339)
    }

    /// Parses an RFC 3339 timestamp string.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is not valid RFC 3339.
    pub fn parse(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::from_offset)
    }

    /// Returns the duration elapsed since `earlier`, or zero if `earlier` is
    /// in the future relative to `self`.
    #[must_use]
    pub fn saturating_duration_since(&self, earlier: Self) -> time::Duration {
        let delta = self.0 - earlier.0;
        if delta.is_negative() {
            time::Duration::ZERO
        } else {
            delta
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self
            .to_rfc3339()
            .map_err(|err| serde::ser::Error::custom(err.to_string()))?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use super::Timestamp;

    #[test]
    fn round_trips_through_rfc3339() {
        let now = Timestamp::now();
        let text = now.to_rfc3339().expect("format succeeds");
        let parsed = Timestamp::parse(&text).expect("parse succeeds");
        assert_eq!(now, parsed);
    }

    #[test]
    fn serializes_as_json_string() {
        let now = Timestamp::now();
        let json = serde_json::to_string(&now).expect("serialize succeeds");
        assert!(json.starts_with('"'));
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize succeeds");
        assert_eq!(now, back);
    }

    #[test]
    fn saturating_duration_since_never_negative() {
        let earlier = Timestamp::now();
        let later = Timestamp::from_offset(earlier.as_offset() + time::Duration::seconds(5));
        assert_eq!(
            earlier.saturating_duration_since(later),
            time::Duration::ZERO
        );
        assert_eq!(
            later.saturating_duration_since(earlier),
            time::Duration::seconds(5)
        );
    }
}
