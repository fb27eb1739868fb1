//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Result, SchemaError};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a timestamp as written by the labeling tools.
///
/// Accepts RFC 3339 (with `Z` or a numeric offset) and, for legacy files,
/// naive `YYYY-MM-DDTHH:MM:SS[.frac]` values which are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Err(SchemaError::Malformed(format!("unparseable timestamp `{s}`")).into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_parse_rfc3339_zulu() {
        let dt = parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        assert_eq!(dt.timestamp(), 1_561_853_098);
    }

    #[test]
    fn test_parse_rfc3339_offset() {
        let a = parse_timestamp("2019-06-30T00:04:58+00:00").unwrap();
        let b = parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_naive_assumed_utc() {
        let a = parse_timestamp("2019-06-30T00:04:58").unwrap();
        let b = parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_naive_with_space() {
        let a = parse_timestamp("2019-06-30 00:04:58").unwrap();
        let b = parse_timestamp("2019-06-30T00:04:58Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_timestamp("not-a-timestamp").is_err());
        assert!(parse_timestamp("").is_err());
    }
}
