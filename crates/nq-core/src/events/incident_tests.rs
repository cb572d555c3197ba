//! Tests for incident payloads.

use super::*;

#[test]
fn test_single_incident() {
    let payload = br#"{
        "number": "INC0012345",
        "crn_full": "crn:v1:bluemix:public:kms:us-south::::",
        "short_description": "Key service degraded",
        "severity": 1,
        "sys_updated_on": "2024-01-02 10:00:00"
    }"#;

    let batch = parse_incidents(payload).unwrap();

    assert!(!batch.bulk);
    let incident = &batch.records[0];
    assert_eq!(incident.source, "servicenow");
    assert_eq!(incident.source_id, "INC0012345");
    assert_eq!(incident.severity, "1");
    assert_eq!(incident.source_update_time, "2024-01-02 10:00:00");
    assert!(!incident.is_case());
}

#[test]
fn test_result_envelope_is_bulk() {
    let payload = br#"{"result": [{"source_id": "INC1"}, {"source_id": "CS22"}]}"#;

    let batch = parse_incidents(payload).unwrap();

    assert!(batch.bulk);
    assert_eq!(batch.records.len(), 2);
    assert!(batch.records[1].is_case());
}

/// Verify an incident without an identifier is rejected.
#[test]
fn test_missing_source_id_is_bad_message() {
    let err = parse_incidents(br#"{"short_description": "x"}"#).unwrap_err();
    assert!(matches!(err, PipelineError::BadMessage { .. }));
}

#[test]
fn test_to_notification() {
    let batch = parse_incidents(
        br#"{"source_id":"INC9","crn_full":["crn:v1::::::::"],"outage_start":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let incident = &batch.records[0];

    let notification = incident.to_notification();

    assert_eq!(notification.notification_type, "incident");
    assert_eq!(notification.incident_id, "INC9");
    assert_eq!(notification.event_time_start, "2024-01-01T00:00:00Z");
    assert_eq!(notification.crn_full.len(), 1);
}
