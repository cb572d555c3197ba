//! Tests for the reliable producer.

use super::*;
use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use nq_broker::BrokerError;
use nq_core::AesGcmCipher;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

mock! {
    pub Publisher {}

    #[async_trait]
    impl Publisher for Publisher {
        async fn publish(&self, routing_key: &RoutingKey, body: Bytes) -> Result<(), BrokerError>;
    }
}

fn cipher() -> Arc<AesGcmCipher> {
    Arc::new(AesGcmCipher::new(&[7u8; 32]).unwrap())
}

fn key(value: &str) -> RoutingKey {
    RoutingKey::new(value).unwrap()
}

fn publish_failure() -> BrokerError {
    BrokerError::PublishFailed {
        routing_key: "nq2ds.incident".to_string(),
        message: "channel closed".to_string(),
    }
}

mod encryption {
    use super::*;

    /// Verify the broker receives ciphertext that decrypts to the serialized message.
    #[tokio::test]
    async fn test_body_is_encrypted_json() {
        let cipher = cipher();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .with(eq(key("nq2ds.incident")), mockall::predicate::always())
            .times(1)
            .returning(move |_, body| {
                sink.lock().unwrap().push(body);
                Ok(())
            });

        let producer = ReliableProducer::new(Arc::new(publisher), cipher.clone(), Duration::from_secs(5));
        producer
            .produce(&key("nq2ds.incident"), &serde_json::json!({"source_id": "INC1"}))
            .await
            .unwrap();

        let bodies = captured.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(!bodies[0].windows(6).any(|w| w == b"INC1\"}"));
        let plaintext = cipher.decrypt(&bodies[0]).unwrap();
        assert_eq!(plaintext, br#"{"source_id":"INC1"}"#);
    }

    #[tokio::test]
    async fn test_plaintext_is_forwarded_unchanged() {
        let cipher = cipher();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(1).returning(move |_, body| {
            sink.lock().unwrap().push(body);
            Ok(())
        });

        let producer = ReliableProducer::new(Arc::new(publisher), cipher.clone(), Duration::from_secs(5));
        producer
            .produce_plaintext(&key("nq2ds.notification_sub"), b"{\"a\": 1}")
            .await
            .unwrap();

        let body = captured.lock().unwrap()[0].clone();
        assert_eq!(cipher.decrypt(&body).unwrap(), b"{\"a\": 1}");
    }
}

mod outer_retry {
    use super::*;

    /// Verify failures escaping the publisher are retried with pacing until success.
    #[tokio::test(start_paused = true)]
    async fn test_retries_until_publish_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(4).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(publish_failure())
            } else {
                Ok(())
            }
        });

        let metrics = PipelineMetrics::new().unwrap();
        let producer = ReliableProducer::new(Arc::new(publisher), cipher(), Duration::from_secs(5))
            .with_metrics(metrics.clone());

        let started = tokio::time::Instant::now();
        producer
            .produce(&key("nq2ds.resource"), &serde_json::json!({"name": "kms"}))
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(metrics.producer_retries_total.get(), 3);
        assert_eq!(
            metrics
                .messages_produced_total
                .with_label_values(&["nq2ds.resource"])
                .get(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_ciphertext_is_republished() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(2).returning(move |_, body| {
            let mut bodies = sink.lock().unwrap();
            bodies.push(body);
            if bodies.len() == 1 {
                Err(publish_failure())
            } else {
                Ok(())
            }
        });

        let producer = ReliableProducer::new(Arc::new(publisher), cipher(), Duration::from_secs(5));
        producer
            .produce(&key("nq2ds.case"), &serde_json::json!({"source_id": "CS1"}))
            .await
            .unwrap();

        let bodies = captured.lock().unwrap();
        assert_eq!(bodies[0], bodies[1]);
    }
}
