//! End-to-end pipeline scenarios
//!
//! These tests verify:
//! - A new announcement is stored and forwarded encrypted
//! - Duplicates are dropped unless their update time is newer
//! - A maintenance change record fans out to both output keys
//! - A delivery that cannot be decrypted is dead-lettered and tagged

mod common;

use common::Pipeline;
use nq_core::time::is_newer;
use nq_core::NotificationStore;
use serde_json::json;

fn announcement(updated: &str) -> serde_json::Value {
    json!({
        "source": "demo",
        "source_id": "A1",
        "crn_full": "crn:v1::::::::",
        "source_update_time": updated,
        "short_description": "hello",
    })
}

/// Verify a new announcement is stored and forwarded encrypted.
#[tokio::test]
async fn test_new_announcement_is_accepted() {
    let pipeline = Pipeline::start().await;

    pipeline
        .send("notification", &announcement("2024-01-01T00:00:00Z"))
        .await;

    let forwarded = pipeline.decrypted_outputs("nq2ds.notification_sub", 1).await;
    assert_eq!(forwarded[0]["source_id"], "A1");
    assert_eq!(pipeline.store.row_count(), 1);

    pipeline.stop().await.unwrap();
}

/// Verify a resend with the same update time changes nothing.
#[tokio::test]
async fn test_duplicate_with_equal_update_time_is_dropped() {
    let pipeline = Pipeline::start().await;
    pipeline
        .send("notification", &announcement("2024-01-01T00:00:00Z"))
        .await;
    pipeline.acked("nq.notification", 1).await;
    let before = pipeline.store.get_rows("demo", "A1").await.unwrap();

    pipeline
        .send("notification", &announcement("2024-01-01T00:00:00Z"))
        .await;
    pipeline.acked("nq.notification", 2).await;

    let after = pipeline.store.get_rows("demo", "A1").await.unwrap();
    assert_eq!(before, after);
    assert_eq!(pipeline.published("nq2ds.notification_sub").len(), 1);
    assert!(pipeline.broker.dead_letters("nq.notification").is_empty());

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_with_newer_update_time_is_forwarded() {
    let pipeline = Pipeline::start().await;
    pipeline
        .send("notification", &announcement("2024-01-01T00:00:00Z"))
        .await;
    pipeline.acked("nq.notification", 1).await;
    let before = pipeline.store.get_rows("demo", "A1").await.unwrap();

    pipeline
        .send("notification", &announcement("2024-01-02T00:00:00Z"))
        .await;

    let forwarded = pipeline.decrypted_outputs("nq2ds.notification_sub", 2).await;
    assert_eq!(forwarded[1]["source_update_time"], "2024-01-02T00:00:00Z");

    pipeline.acked("nq.notification", 2).await;
    let after = pipeline.store.get_rows("demo", "A1").await.unwrap();
    assert!(is_newer(&after[0].pnp_update_time, &before[0].pnp_update_time));

    pipeline.stop().await.unwrap();
}

/// Verify a change record is emitted and its notification derived once.
#[tokio::test]
async fn test_maintenance_change_record_fans_out() {
    let pipeline = Pipeline::start().await;

    pipeline
        .send(
            "maintenance",
            &json!({
                "source_id": "CHG12345",
                "crn_full": ["crn:v1:bluemix:public:kms:us-south:::"],
                "planned_start": "2024-03-01T02:00:00Z",
                "planned_end": "2024-03-01T04:00:00Z",
                "short_description": "Database patching",
                "source_update_time": "2024-02-20T00:00:00Z",
            }),
        )
        .await;

    let maintenance = pipeline.decrypted_outputs("nq2ds.maintenance", 1).await;
    assert_eq!(maintenance[0]["source_id"], "CHG12345");
    let notifications = pipeline.decrypted_outputs("nq2ds.notification", 1).await;
    assert_eq!(notifications[0]["type"], "maintenance");

    pipeline.acked("nq.maintenance", 1).await;
    assert_eq!(pipeline.broker.acked_count("nq.maintenance"), 1);
    assert_eq!(pipeline.published("nq2ds.maintenance").len(), 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_decrypt_failure_goes_to_dead_letters() {
    let pipeline = Pipeline::start().await;

    pipeline
        .send_raw("incident", b"definitely not ciphertext".to_vec())
        .await;

    let dead = pipeline.dead_letters("nq.incident", 1).await;
    assert_eq!(dead[0].as_ref(), b"definitely not ciphertext");
    assert_eq!(pipeline.store.row_count(), 0);
    assert_eq!(
        pipeline
            .recorder
            .with_tag("error_category", "decrypt-failed")
            .len(),
        1
    );

    pipeline.stop().await.unwrap();
}
