//! Timestamp normalization
//!
//! Anchor timestamps are UTC with microsecond precision and always render as
//! `YYYY-MM-DDTHH:MM:SS.ffffffZ`, so the canonical payload is identical no
//! matter which RFC 3339 spelling the caller used.

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::ValidationError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current time, truncated to the stored precision
pub fn now() -> DateTime<Utc> {
    normalize(Utc::now())
}

/// Truncate to microseconds
pub fn normalize(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Render in the canonical form
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse any RFC 3339 timestamp and convert it to normalized UTC
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|dt| normalize(dt.with_timezone(&Utc)))
        .map_err(|e| ValidationError::new("timestamp", format!("not ISO-8601: {}", e)))
}

/// Serde adapter for `DateTime<Utc>` fields stored in canonical form
pub mod canonical {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_normalize_to_utc() {
        let a = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        let b = parse_timestamp("2024-03-01T14:00:00+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(format_timestamp(&a), "2024-03-01T12:00:00.000000Z");
    }

    #[test]
    fn test_sub_microsecond_digits_are_dropped() {
        let ts = parse_timestamp("2024-03-01T12:00:00.123456789Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:00:00.123456Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert_eq!(err.field, "timestamp");
    }
}
