//! JIRA timestamp parsing
//!
//! JIRA Server and Cloud disagree on how they render `updated`: with or
//! without milliseconds, and with `+0300` or `+03:00` offsets. Each known
//! encoding is tried in order and the first that parses wins.

use crate::{MirrorError, Result};
use chrono::{DateTime, Utc};

/// Known encodings, most common first
const JIRA_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.3f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
];

/// Parse a remote timestamp into an absolute UTC instant.
///
/// An empty or `null` value means "no timestamp" and yields `Ok(None)`.
pub fn parse_jira_time(value: &str) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim().trim_matches('"');
    if value.is_empty() || value == "null" {
        return Ok(None);
    }

    for format in JIRA_TIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
    }

    // RFC 3339 covers the `Z` suffix
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|_| MirrorError::TimeParseFailed {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_millis_with_positive_offset() {
        let parsed = parse_jira_time("2024-01-02T15:04:05.000+0300")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 2, 12, 4, 5).unwrap());
    }

    #[test]
    fn test_seconds_with_negative_offset() {
        let parsed = parse_jira_time("2024-01-02T15:04:05-0300").unwrap().unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 2, 18, 4, 5).unwrap());
    }

    #[test]
    fn test_colon_offsets_and_zulu() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 30, 21, 0, 0).unwrap();
        assert_eq!(
            parse_jira_time("2024-07-01T00:00:00.000+03:00").unwrap(),
            Some(expected)
        );
        assert_eq!(
            parse_jira_time("2024-07-01T00:00:00+03:00").unwrap(),
            Some(expected)
        );
        assert_eq!(
            parse_jira_time("2024-06-30T21:00:00Z").unwrap(),
            Some(expected)
        );
    }

    #[test]
    fn test_empty_and_null_mean_absent() {
        assert_eq!(parse_jira_time("").unwrap(), None);
        assert_eq!(parse_jira_time("null").unwrap(), None);
        assert_eq!(parse_jira_time("\"\"").unwrap(), None);
    }

    #[test]
    fn test_unknown_encoding_fails() {
        let err = parse_jira_time("02/01/2024 15:04").unwrap_err();
        assert!(
            matches!(err, MirrorError::TimeParseFailed { ref value } if value == "02/01/2024 15:04")
        );
    }
}
