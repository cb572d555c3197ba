//! Tests for service construction and the consume loop.

use super::*;
use nq_broker::InMemoryBroker;
use nq_core::monitoring::MemoryRecorder;
use nq_core::secrets::{InMemorySecretStore, StandardSecrets};
use nq_core::store::InMemoryNotificationStore;
use serde_json::json;

const ENDPOINT: &str = "amqp://localhost:5672";
const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.broker.urls = vec![ENDPOINT.to_string()];
    config.database.url = "postgres://unused/nq".to_string();
    config
}

fn secrets(key: &str) -> Arc<InMemorySecretStore> {
    Arc::new(InMemorySecretStore::new().with_secret(StandardSecrets::encryption_key(), key))
}

fn deps(broker: &InMemoryBroker, secrets: Arc<InMemorySecretStore>) -> Dependencies {
    Dependencies {
        transport: Arc::new(broker.clone()),
        store: Arc::new(InMemoryNotificationStore::new()),
        secrets,
        recorder: Arc::new(MemoryRecorder::new()),
        upstream: None,
    }
}

async fn build_error(config: ServiceConfig, deps: Dependencies) -> ServiceError {
    match Service::build(config, deps).await {
        Ok(_) => panic!("service unexpectedly built"),
        Err(e) => e,
    }
}

mod boot_failures {
    use super::*;

    #[tokio::test]
    async fn test_invalid_configuration_exits_3() {
        let broker = InMemoryBroker::new();
        let mut config = config();
        config.database.url.clear();

        let err = build_error(config, deps(&broker, secrets(KEY_HEX))).await;

        assert!(matches!(err, ServiceError::Configuration(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_missing_key_exits_6() {
        let broker = InMemoryBroker::new();

        let err = build_error(config(), deps(&broker, Arc::new(InMemorySecretStore::new()))).await;

        assert!(matches!(err, ServiceError::Secret(_)));
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_short_key_exits_6() {
        let broker = InMemoryBroker::new();

        let err = build_error(config(), deps(&broker, secrets("c2hvcnQ="))).await;

        assert!(matches!(err, ServiceError::Encryption(_)));
        assert_eq!(err.exit_code(), 6);
    }

    /// Verify an unreachable broker fails the boot after the bounded connect.
    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_exits_5() {
        let broker = InMemoryBroker::new();
        broker.set_endpoint_reachable(ENDPOINT, false);

        let err = build_error(config(), deps(&broker, secrets(KEY_HEX))).await;

        assert!(matches!(err, ServiceError::Broker(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn test_enabled_adapter_needs_upstream() {
        let broker = InMemoryBroker::new();
        let mut config = config();
        config.adapter.enabled = true;
        config.adapter.notifications_url = "https://upstream.test/notifications".to_string();

        let err = build_error(config, deps(&broker, secrets(KEY_HEX))).await;

        assert!(matches!(err, ServiceError::Adapter(_)));
    }
}

mod running {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Publish once the consumer has bound its queues
    async fn publish_when_bound(broker: &InMemoryBroker, key: &str, body: Vec<u8>) {
        for _ in 0..200 {
            if let Ok(queues) = broker.publish_external("nq", key, body.clone()) {
                if queues > 0 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("consumer never bound '{}'", key);
    }

    async fn wait_for_bodies(broker: &InMemoryBroker, key: &str, count: usize) -> Vec<bytes::Bytes> {
        for _ in 0..200 {
            let bodies = broker.published_bodies("nq", key);
            if bodies.len() >= count {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} bodies on '{}'", count, key);
    }

    #[tokio::test]
    async fn test_healthz_is_served_after_build() {
        let broker = InMemoryBroker::new();
        let service = Service::build(config(), deps(&broker, secrets(KEY_HEX)))
            .await
            .unwrap();

        let response = service
            .router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    /// Verify a notification consumed from the broker is forwarded encrypted.
    #[tokio::test]
    async fn test_notification_flows_through_pipeline() {
        let broker = InMemoryBroker::new();
        let service = Service::build(config(), deps(&broker, secrets(KEY_HEX)))
            .await
            .unwrap();
        let metrics = service.metrics();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(service.run(shutdown));

        let cipher = AesGcmCipher::new(&hex_key()).unwrap();
        let plaintext = json!({
            "source": "demo",
            "source_id": "A1",
            "crn_full": "crn:v1::::::::",
            "source_update_time": "2024-01-01T00:00:00Z",
            "short_description": "hello",
        })
        .to_string();
        publish_when_bound(&broker, "notification", cipher.encrypt(plaintext.as_bytes()).unwrap()).await;

        let bodies = wait_for_bodies(&broker, "nq2ds.notification_sub", 1).await;
        assert_eq!(cipher.decrypt(&bodies[0]).unwrap(), plaintext.as_bytes());

        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(
            metrics
                .deliveries_total
                .with_label_values(&["notification", "ack"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_undecryptable_delivery_is_dead_lettered() {
        let broker = InMemoryBroker::new();
        let service = Service::build(config(), deps(&broker, secrets(KEY_HEX)))
            .await
            .unwrap();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(service.run(shutdown));

        publish_when_bound(&broker, "incident", b"not ciphertext".to_vec()).await;

        let mut dead = Vec::new();
        for _ in 0..200 {
            dead = broker.dead_letters("nq.incident");
            if !dead.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dead.len(), 1);

        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    fn hex_key() -> Vec<u8> {
        (0u8..32).collect()
    }
}
