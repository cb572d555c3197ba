//! Integration tests for endpoint failover and consumer recovery
//!
//! These tests verify:
//! - Boot fails over to the alternate endpoint when the primary refuses
//! - A broker restart mid-run is recovered without losing deliveries
//! - A pool with a single unreachable endpoint gives up instead of looping

mod common;

use common::{config, Pipeline, PRIMARY, SECONDARY};
use nq_broker::InMemoryBroker;
use nq_core::monitoring::MemoryRecorder;
use nq_core::secrets::{InMemorySecretStore, StandardSecrets};
use nq_core::store::InMemoryNotificationStore;
use nq_service::{Dependencies, Service, ServiceError};
use serde_json::json;
use std::sync::Arc;

fn announcement(source_id: &str) -> serde_json::Value {
    json!({
        "source": "demo",
        "source_id": source_id,
        "crn_full": "crn:v1::::::::",
        "source_update_time": "2024-01-01T00:00:00Z",
        "short_description": "hello",
    })
}

/// Verify the service boots on the alternate endpoint and stays there.
#[tokio::test(start_paused = true)]
async fn test_boot_fails_over_to_alternate_endpoint() {
    let broker = InMemoryBroker::new();
    broker.set_endpoint_reachable(PRIMARY, false);
    let mut config = config();
    config.broker.urls = vec![PRIMARY.to_string(), SECONDARY.to_string()];

    let pipeline = Pipeline::start_on(broker, config).await;
    pipeline.send("notification", &announcement("A1")).await;
    pipeline.outputs("nq2ds.notification_sub", 1).await;

    assert!(pipeline.broker.connect_attempts(PRIMARY) >= 1);
    let endpoints = pipeline.broker.open_channel_endpoints();
    assert!(!endpoints.is_empty());
    assert!(endpoints.iter().all(|e| e == SECONDARY));

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_consumer_recovers_after_broker_restart() {
    let pipeline = Pipeline::start().await;
    pipeline.send("notification", &announcement("A1")).await;
    pipeline.outputs("nq2ds.notification_sub", 1).await;
    pipeline.acked("nq.notification", 1).await;

    pipeline.broker.close_all_connections("broker restart");
    pipeline.send("notification", &announcement("A2")).await;

    let forwarded = pipeline.decrypted_outputs("nq2ds.notification_sub", 2).await;
    assert_eq!(forwarded[1]["source_id"], "A2");
    pipeline.acked("nq.notification", 2).await;
    assert_eq!(pipeline.store.row_count(), 2);

    pipeline.stop().await.unwrap();
}

/// Verify a single unreachable endpoint ends the boot with a broker error.
#[tokio::test(start_paused = true)]
async fn test_single_unreachable_endpoint_gives_up() {
    let broker = InMemoryBroker::new();
    broker.set_endpoint_reachable(PRIMARY, false);
    let deps = Dependencies {
        transport: Arc::new(broker.clone()),
        store: Arc::new(InMemoryNotificationStore::new()),
        secrets: Arc::new(
            InMemorySecretStore::new()
                .with_secret(StandardSecrets::encryption_key(), common::KEY_HEX),
        ),
        recorder: Arc::new(MemoryRecorder::new()),
        upstream: None,
    };

    let result = Service::build(config(), deps).await;

    let err = match result {
        Ok(_) => panic!("boot should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, ServiceError::Broker(_)));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(
        broker.connect_attempts(PRIMARY),
        nq_broker::RETRY_COUNT
    );
}
