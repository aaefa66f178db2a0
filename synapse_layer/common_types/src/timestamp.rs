// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

use std::{
    fmt,
    fmt::Display,
    ops::{Add, Sub},
    str::FromStr,
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// An ISO-8601 UTC instant with a canonical fixed-width rendering.
///
/// The canonical form always carries microsecond precision
/// (`2024-05-01T12:00:00.000000Z`) so that lexicographic comparison of the
/// rendered strings agrees with chronological order. All replicated state
/// uses this type for `created_at`/`updated_at` fields, and last-write-wins
/// merges compare these values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// The canonical fixed-width rendering used on the wire and in snapshots.
    pub fn to_canonical_string(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let delta = chrono::Duration::from_std(duration).ok()?;
        self.0.checked_add_signed(delta).map(Self)
    }

    /// Whole seconds elapsed since `earlier`. Negative if `earlier` is in the
    /// future relative to `self`.
    pub fn seconds_since(self, earlier: Timestamp) -> i64 {
        self.0.signed_duration_since(earlier.0).num_seconds()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        self.checked_add(rhs).expect("timestamp overflow")
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = chrono::Duration;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0.signed_duration_since(rhs.0)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Owned String so this also works through serde_json::from_value
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_rendering_is_fixed_width_and_ordered() {
        let early = Timestamp::from_datetime("2024-01-02T03:04:05.000001Z".parse().unwrap());
        let late = early + Duration::from_secs(1);
        let (a, b) = (early.to_canonical_string(), late.to_canonical_string());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert!(early < late);
    }

    #[test]
    fn serde_round_trip_preserves_ordering_semantics() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        // Canonical form carries microseconds only
        assert_eq!(back.to_canonical_string(), ts.to_canonical_string());
    }

    #[test]
    fn parses_non_canonical_precision() {
        let ts: Timestamp = "2024-05-01T12:00:00Z".parse().unwrap();
        assert_eq!(ts.to_canonical_string(), "2024-05-01T12:00:00.000000Z");
    }

    #[test]
    fn seconds_since() {
        let a: Timestamp = "2024-05-01T12:00:00Z".parse().unwrap();
        let b: Timestamp = "2024-05-01T12:05:00Z".parse().unwrap();
        assert_eq!(b.seconds_since(a), 300);
        assert_eq!(a.seconds_since(b), -300);
    }
}
