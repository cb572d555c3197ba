//! Tests for timestamp helpers.

use super::*;
use chrono::TimeZone;

#[test]
fn test_parse_accepts_rfc3339_and_space_separated() {
    let rfc = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
    let offset = parse_timestamp("2024-01-01T01:00:00+01:00").unwrap();
    let spaced = parse_timestamp("2024-01-01 00:00:00").unwrap();

    assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(rfc, offset);
    assert_eq!(rfc, spaced);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(matches!(
        parse_timestamp("yesterday"),
        Err(ValidationError::InvalidFormat { .. })
    ));
    assert!(matches!(
        parse_timestamp("  "),
        Err(ValidationError::Required { .. })
    ));
}

mod comparison {
    use super::*;

    #[test]
    fn test_empty_values_are_equal() {
        assert!(!timestamps_differ("", ""));
    }

    /// Verify equal instants in different notations do not differ.
    #[test]
    fn test_same_instant_different_offsets() {
        assert!(!timestamps_differ(
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00+02:00"
        ));
        assert!(timestamps_differ(
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z"
        ));
    }

    #[test]
    fn test_unparseable_falls_back_to_string_equality() {
        assert!(!timestamps_differ("n/a", "n/a"));
        assert!(timestamps_differ("n/a", "2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("2024-01-02T00:00:00Z", "2024-01-01T00:00:00Z"));
        assert!(!is_newer("2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"));
        assert!(!is_newer("2023-12-31T00:00:00Z", "2024-01-01T00:00:00Z"));
        assert!(is_newer("2024-01-01T00:00:00Z", ""));
        assert!(!is_newer("", "2024-01-01T00:00:00Z"));
    }
}

mod monotonic {
    use super::*;

    #[test]
    fn test_advance_uses_now_when_later() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            advance("2024-01-01T00:00:00Z", now),
            "2024-06-01T12:00:00.000000Z"
        );
    }

    /// Verify the value never stands still or moves backwards.
    #[test]
    fn test_advance_moves_past_previous() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = advance("2024-01-01T00:00:00.000000Z", now);

        assert_eq!(next, "2024-01-01T00:00:00.000001Z");
        assert!(is_newer(&next, "2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_age_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ninety_days = Duration::days(90);

        assert!(is_older_than("2024-01-01T00:00:00Z", ninety_days, now));
        assert!(!is_older_than("2024-05-01T00:00:00Z", ninety_days, now));
        assert!(!is_older_than("", ninety_days, now));
    }
}
