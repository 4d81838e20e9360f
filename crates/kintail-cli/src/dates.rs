//! Date arguments for `kt cat --begin/--end`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parse a date to epoch milliseconds. Zone-less forms are read as UTC.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`), `YYYY-MM-DD HH:MM:SS` and
/// `YYYY-MM-DD`. Used as a clap `value_parser`.
///
/// # Errors
///
/// Returns a message naming the accepted forms when none match.
pub fn parse_epoch_millis(value: &str) -> Result<i64, String> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc().timestamp_millis());
        }
    }
    let midnight = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0));
    if let Some(midnight) = midnight {
        return Ok(midnight.and_utc().timestamp_millis());
    }

    Err(format!(
        "invalid date '{value}' (expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' or 'YYYY-MM-DD')"
    ))
}
