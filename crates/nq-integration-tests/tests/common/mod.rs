//! Common test utilities for the pipeline integration tests
//!
//! This module provides:
//! - A running [`Pipeline`] over the in-memory broker, store and recorder
//! - Helpers that publish encrypted inputs once the consumer has bound
//! - Polling helpers for outputs, acknowledgements and dead letters

#![allow(dead_code)]

use bytes::Bytes;
use nq_broker::InMemoryBroker;
use nq_core::monitoring::MemoryRecorder;
use nq_core::secrets::{InMemorySecretStore, StandardSecrets};
use nq_core::store::InMemoryNotificationStore;
use nq_core::{AesGcmCipher, Cipher};
use nq_service::{Dependencies, PipelineMetrics, Service, ServiceConfig, ServiceError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

pub const PRIMARY: &str = "amqp://primary:5672";
pub const SECONDARY: &str = "amqp://secondary:5672";
pub const EXCHANGE: &str = "nq";

/// Hex form of the key bytes `00..1f`
pub const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ROUNDS: usize = 500;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration pointing at the primary endpoint only
pub fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.broker.urls = vec![PRIMARY.to_string()];
    config.broker.reconnect_backoff_ms = 50;
    config.database.url = "postgres://unused/nq".to_string();
    config
}

pub fn test_cipher() -> AesGcmCipher {
    let key: Vec<u8> = (0u8..32).collect();
    AesGcmCipher::new(&key).unwrap()
}

// ============================================================================
// Running Pipeline
// ============================================================================

/// A service consuming from an in-memory broker
pub struct Pipeline {
    pub broker: InMemoryBroker,
    pub store: Arc<InMemoryNotificationStore>,
    pub recorder: MemoryRecorder,
    pub metrics: Arc<PipelineMetrics>,
    pub cipher: AesGcmCipher,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), ServiceError>>,
}

impl Pipeline {
    pub async fn start() -> Self {
        Self::start_on(InMemoryBroker::new(), config()).await
    }

    /// Build and run the service against `broker`
    pub async fn start_on(broker: InMemoryBroker, config: ServiceConfig) -> Self {
        let store = Arc::new(InMemoryNotificationStore::new());
        let recorder = MemoryRecorder::new();
        let secrets = InMemorySecretStore::new()
            .with_secret(StandardSecrets::encryption_key(), KEY_HEX);

        let deps = Dependencies {
            transport: Arc::new(broker.clone()),
            store: store.clone(),
            secrets: Arc::new(secrets),
            recorder: Arc::new(recorder.clone()),
            upstream: None,
        };

        let service = Service::build(config, deps)
            .await
            .expect("service should build");
        let metrics = service.metrics();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(service.run(shutdown));

        Self {
            broker,
            store,
            recorder,
            metrics,
            cipher: test_cipher(),
            stop,
            task,
        }
    }

    /// Encrypt `document` and publish it on `routing_key`
    pub async fn send(&self, routing_key: &str, document: &serde_json::Value) {
        let body = self.cipher.encrypt(document.to_string().as_bytes()).unwrap();
        self.send_raw(routing_key, body).await;
    }

    /// Publish `body` as-is once a queue is bound for `routing_key`
    pub async fn send_raw(&self, routing_key: &str, body: Vec<u8>) {
        for _ in 0..POLL_ROUNDS {
            if let Ok(queues) = self.broker.publish_external(EXCHANGE, routing_key, body.clone()) {
                if queues > 0 {
                    return;
                }
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("no queue bound for '{}'", routing_key);
    }

    /// Wait until `count` bodies were published on `routing_key`
    pub async fn outputs(&self, routing_key: &str, count: usize) -> Vec<Bytes> {
        for _ in 0..POLL_ROUNDS {
            let bodies = self.broker.published_bodies(EXCHANGE, routing_key);
            if bodies.len() >= count {
                return bodies;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("expected {} messages on '{}'", count, routing_key);
    }

    /// Decrypted outputs parsed as JSON
    pub async fn decrypted_outputs(&self, routing_key: &str, count: usize) -> Vec<serde_json::Value> {
        self.outputs(routing_key, count)
            .await
            .iter()
            .map(|body| {
                let plaintext = self.cipher.decrypt(body).unwrap();
                serde_json::from_slice(&plaintext).unwrap()
            })
            .collect()
    }

    /// Bodies published on `routing_key` so far
    pub fn published(&self, routing_key: &str) -> Vec<Bytes> {
        self.broker.published_bodies(EXCHANGE, routing_key)
    }

    /// Wait until `count` deliveries from `queue` were acknowledged
    pub async fn acked(&self, queue: &str, count: u64) {
        for _ in 0..POLL_ROUNDS {
            if self.broker.acked_count(queue) >= count {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("expected {} acknowledgements on '{}'", count, queue);
    }

    /// Wait until `queue` holds `count` dead letters
    pub async fn dead_letters(&self, queue: &str, count: usize) -> Vec<Bytes> {
        for _ in 0..POLL_ROUNDS {
            let dead = self.broker.dead_letters(queue);
            if dead.len() >= count {
                return dead;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("expected {} dead letters on '{}'", count, queue);
    }

    /// Signal shutdown and wait for the service to stop
    pub async fn stop(self) -> Result<(), ServiceError> {
        let _ = self.stop.send(true);
        self.task.await.expect("service task panicked")
    }
}
