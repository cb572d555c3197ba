//! Test fixtures shared by the handler and dispatcher tests.

use super::{HandlerContext, OutputKeys};
use crate::config::RoutesConfig;
use crate::metrics::PipelineMetrics;
use crate::producer::ReliableProducer;
use async_trait::async_trait;
use bytes::Bytes;
use nq_broker::{BrokerError, Publisher, RoutingKey};
use nq_core::store::InMemoryNotificationStore;
use nq_core::{AesGcmCipher, Cipher, ComparisonEngine};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Publisher that keeps every accepted body
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<(String, Bytes)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, routing_key: &RoutingKey, body: Bytes) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), body));
        Ok(())
    }
}

pub(crate) struct Harness {
    pub ctx: Arc<HandlerContext>,
    pub store: Arc<InMemoryNotificationStore>,
    pub metrics: Arc<PipelineMetrics>,
    cipher: Arc<AesGcmCipher>,
    publisher: Arc<RecordingPublisher>,
}

impl Harness {
    pub fn new() -> Self {
        let cipher = Arc::new(AesGcmCipher::new(&[42u8; 32]).unwrap());
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(InMemoryNotificationStore::new());
        let metrics = PipelineMetrics::new().unwrap();

        let producer = ReliableProducer::new(publisher.clone(), cipher.clone(), Duration::from_secs(5))
            .with_metrics(metrics.clone());

        let ctx = HandlerContext {
            store: store.clone(),
            producer: Arc::new(producer),
            cipher: cipher.clone(),
            keys: OutputKeys::from_routes(&RoutesConfig::default()).unwrap(),
            engine: ComparisonEngine::default(),
            metrics: Some(metrics.clone()),
        };

        Self {
            ctx: Arc::new(ctx),
            store,
            metrics,
            cipher,
            publisher,
        }
    }

    /// Encrypt a JSON document the way upstream producers do
    pub fn payload(&self, value: serde_json::Value) -> Vec<u8> {
        self.cipher
            .encrypt(value.to_string().as_bytes())
            .unwrap()
    }

    /// Decrypted bodies published under `routing_key`, in publish order
    pub fn published(&self, routing_key: &str) -> Vec<serde_json::Value> {
        self.published_raw(routing_key)
            .iter()
            .map(|plain| serde_json::from_slice(plain).unwrap())
            .collect()
    }

    pub fn published_raw(&self, routing_key: &str) -> Vec<Vec<u8>> {
        self.publisher
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, body)| self.cipher.decrypt(body).unwrap())
            .collect()
    }

    pub fn total_published(&self) -> usize {
        self.publisher.published.lock().unwrap().len()
    }
}
