//! # Reliable Producer
//!
//! Encrypted, retry-until-success publishing for handlers and the adapter.
//!
//! A payload is encrypted once. The [`Publisher`] underneath already retries
//! within its own budget and waits out reconnects; any error that still
//! escapes is logged and the publish is repeated after a fixed pause, with no
//! deadline. The caller stays blocked, and its delivery unacknowledged, until
//! the broker takes the message.

use crate::metrics::PipelineMetrics;
use bytes::Bytes;
use nq_broker::{Publisher, RoutingKey};
use nq_core::{Cipher, PipelineError, PipelineResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Encrypting publisher with an unbounded outer retry
pub struct ReliableProducer {
    publisher: Arc<dyn Publisher>,
    cipher: Arc<dyn Cipher>,
    pacing: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ReliableProducer {
    pub fn new(publisher: Arc<dyn Publisher>, cipher: Arc<dyn Cipher>, pacing: Duration) -> Self {
        Self {
            publisher,
            cipher,
            pacing,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Serialize `message` as JSON and produce it
    pub async fn produce<T>(&self, routing_key: &RoutingKey, message: &T) -> PipelineResult<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let plaintext = serde_json::to_vec(message).map_err(|e| {
            PipelineError::fatal(format!("message for '{}' not serializable: {}", routing_key, e))
        })?;
        self.produce_plaintext(routing_key, &plaintext).await
    }

    /// Encrypt `plaintext` and publish it, retrying until the broker accepts
    ///
    /// Only an encryption failure returns an error.
    pub async fn produce_plaintext(
        &self,
        routing_key: &RoutingKey,
        plaintext: &[u8],
    ) -> PipelineResult<()> {
        let body = Bytes::from(self.cipher.encrypt(plaintext)?);
        let mut failures: u64 = 0;

        loop {
            match self.publisher.publish(routing_key, body.clone()).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.produced(routing_key.as_str());
                    }
                    debug!(routing_key = %routing_key, failures, "Message produced");
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.producer_retries_total.inc();
                    }
                    warn!(
                        routing_key = %routing_key,
                        failures,
                        retry_in_secs = self.pacing.as_secs(),
                        error = %e,
                        "Publish failed after inner retries, trying again"
                    );
                    tokio::time::sleep(self.pacing).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
