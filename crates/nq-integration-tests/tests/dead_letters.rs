//! Integration tests for the acknowledge policy
//!
//! These tests verify:
//! - Malformed inputs are rejected without requeue and reach the dead letters
//! - Undecodable maintenance batches are acknowledged, not dead-lettered
//! - A store outage leaves the delivery in place until the store returns

mod common;

use common::Pipeline;
use serde_json::json;

#[tokio::test]
async fn test_notification_without_source_is_dead_lettered() {
    let pipeline = Pipeline::start().await;

    pipeline
        .send("notification", &json!({"source_id": "A1"}))
        .await;

    pipeline.dead_letters("nq.notification", 1).await;
    assert_eq!(pipeline.store.row_count(), 0);
    assert!(pipeline.published("nq2ds.notification_sub").is_empty());
    assert_eq!(
        pipeline
            .metrics
            .deliveries_total
            .with_label_values(&["notification", "reject"])
            .get(),
        1
    );

    pipeline.stop().await.unwrap();
}

/// Verify a maintenance payload that does not decode is dropped with an ack.
#[tokio::test]
async fn test_undecodable_maintenance_batch_is_acknowledged() {
    let pipeline = Pipeline::start().await;

    pipeline
        .send("maintenance", &json!("not a maintenance record"))
        .await;

    pipeline.acked("nq.maintenance", 1).await;
    assert!(pipeline.broker.dead_letters("nq.maintenance").is_empty());
    assert!(pipeline.published("nq2ds.maintenance").is_empty());

    pipeline.stop().await.unwrap();
}

/// Verify a store outage delays the delivery instead of dropping it.
#[tokio::test]
async fn test_store_outage_is_retried_until_recovery() {
    let pipeline = Pipeline::start().await;
    pipeline.store.set_outage(true);

    pipeline
        .send(
            "notification",
            &json!({
                "source": "demo",
                "source_id": "A1",
                "crn_full": "crn:v1::::::::",
                "source_update_time": "2024-01-01T00:00:00Z",
            }),
        )
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(pipeline.published("nq2ds.notification_sub").is_empty());
    assert!(pipeline.broker.dead_letters("nq.notification").is_empty());

    pipeline.store.set_outage(false);
    pipeline.outputs("nq2ds.notification_sub", 1).await;
    assert_eq!(pipeline.store.row_count(), 1);

    pipeline.stop().await.unwrap();
}
