//! RFC 3339 timestamp helpers.
//!
//! Notification times travel and persist as strings. Upstream systems are not
//! consistent about the format, so parsing also accepts the space-separated
//! `YYYY-MM-DD HH:MM:SS` form (read as UTC). Comparisons fall back to plain
//! string equality when a value cannot be parsed.

use crate::ValidationError;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};

const SPACE_SEPARATED: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp as RFC 3339 UTC with microsecond precision
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time as RFC 3339 UTC
pub fn now_rfc3339() -> String {
    format_timestamp(Utc::now())
}

/// Parse an upstream timestamp
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "timestamp".to_string(),
        });
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, SPACE_SEPARATED)
        .map(|naive| naive.and_utc())
        .map_err(|e| ValidationError::InvalidFormat {
            field: "timestamp".to_string(),
            message: format!("'{}': {}", trimmed, e),
        })
}

/// Whether two timestamps denote different instants
///
/// Two empty values are equal. Values that do not both parse are compared as
/// strings.
pub fn timestamps_differ(a: &str, b: &str) -> bool {
    if a.is_empty() && b.is_empty() {
        return false;
    }
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => a != b,
    }
}

/// Whether `candidate` is strictly later than `reference`
///
/// A non-empty candidate is newer than an empty reference. Unparseable values
/// count as newer whenever they differ.
pub fn is_newer(candidate: &str, reference: &str) -> bool {
    match (candidate.is_empty(), reference.is_empty()) {
        (true, _) => false,
        (false, true) => true,
        (false, false) => match (parse_timestamp(candidate), parse_timestamp(reference)) {
            (Ok(c), Ok(r)) => c > r,
            _ => candidate != reference,
        },
    }
}

/// Next value for a monotonic timestamp
///
/// Returns `now` unless that would not move past `previous`, in which case
/// the result is one microsecond after `previous`.
pub fn advance(previous: &str, now: DateTime<Utc>) -> String {
    match parse_timestamp(previous) {
        Ok(prev) if now <= prev => format_timestamp(prev + Duration::microseconds(1)),
        _ => format_timestamp(now),
    }
}

/// Whether `value` lies more than `max_age` before `now`
///
/// Unparseable or empty values are never considered old.
pub fn is_older_than(value: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
    parse_timestamp(value)
        .map(|ts| ts < now - max_age)
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "time_tests.rs"]
mod tests;
