//! Tests for resource payloads.

use super::*;

#[test]
fn test_single_resource() {
    let batch = parse_resources(br#"{"name":"kms","active":true,"overview":{"en":"Key Protect"}}"#)
        .unwrap();

    assert!(!batch.bulk);
    assert_eq!(batch.resources[0].name, "kms");
    assert_eq!(batch.resources[0].display_names()[0].text, "Key Protect");
}

#[test]
fn test_resources_envelope() {
    let batch =
        parse_resources(br#"{"resources":[{"name":"kms"},{"name":"cloudant","tags":"db"}]}"#)
            .unwrap();

    assert!(batch.bulk);
    assert_eq!(batch.resources.len(), 2);
    assert_eq!(batch.resources[1].tags, vec!["db".to_string()]);
}

#[test]
fn test_nameless_resource_is_bad_message() {
    let err = parse_resources(br#"[{"name":" "}]"#).unwrap_err();
    assert!(matches!(err, PipelineError::BadMessage { .. }));
}
