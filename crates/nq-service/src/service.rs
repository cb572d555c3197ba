//! # Service Lifecycle
//!
//! Builds a running pipeline from a validated [`ServiceConfig`] and the
//! injected infrastructure, then drives the consumer, the liveness supervisor
//! and the optional adapter runner until shutdown.
//!
//! Boot order matters for the exit code: the encryption key is read first,
//! then the producer session connects. The consumer connects when
//! [`Service::run`] starts.

use crate::adapter_runner::AdapterRunner;
use crate::config::{ConfigError, ServiceConfig};
use crate::dispatcher::Dispatcher;
use crate::handlers::{HandlerContext, OutputKeys};
use crate::health::{self, HealthState, LivenessSupervisor};
use crate::metrics::PipelineMetrics;
use crate::producer::ReliableProducer;
use crate::ServiceError;
use axum::Router;
use nq_broker::{new_consumer, new_producer, BrokerTransport, Consumer, ExchangeKind, Producer};
use nq_core::adapter::{AdapterError, NotificationsAdapter, UpstreamClient};
use nq_core::monitoring::Recorder;
use nq_core::secrets::{SecretName, SecretStore};
use nq_core::{AesGcmCipher, Cipher, CompareOptions, ComparisonEngine, NotificationStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Infrastructure the service runs on
pub struct Dependencies {
    pub transport: Arc<dyn BrokerTransport>,
    pub store: Arc<dyn NotificationStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub recorder: Arc<dyn Recorder>,
    /// Required when the adapter is enabled
    pub upstream: Option<Arc<dyn UpstreamClient>>,
}

/// A fully wired pipeline
pub struct Service {
    consumer: Consumer,
    dispatcher: Arc<Dispatcher>,
    producer: Arc<Producer>,
    supervisor: Arc<LivenessSupervisor>,
    adapter: Option<Arc<AdapterRunner>>,
    metrics: Arc<PipelineMetrics>,
}

impl Service {
    pub async fn build(config: ServiceConfig, deps: Dependencies) -> Result<Self, ServiceError> {
        config.validate()?;

        let metrics = PipelineMetrics::new().map_err(|e| ServiceError::Telemetry {
            message: e.to_string(),
        })?;

        let key_name = SecretName::new(config.encryption.key_secret.clone())?;
        let key = deps.secrets.get_secret(&key_name).await?;
        let cipher: Arc<dyn Cipher> = Arc::new(AesGcmCipher::from_encoded_key(&key)?);

        let broker = &config.broker;
        let producer = Arc::new(
            new_producer(
                deps.transport.clone(),
                broker.endpoint_pool()?,
                None,
                broker.exchange()?,
                ExchangeKind::Direct,
                broker.connection_settings(),
            )
            .await?,
        );
        info!(exchange = %broker.exchange_name, "Producer session connected");

        let reliable = Arc::new(
            ReliableProducer::new(
                producer.clone(),
                cipher.clone(),
                config.pipeline.producer_pacing(),
            )
            .with_metrics(metrics.clone()),
        );

        let keys = OutputKeys::from_routes(&config.routes)
            .map_err(|e| ConfigError::invalid("routes", e.to_string()))?;

        let ctx = Arc::new(HandlerContext {
            store: deps.store.clone(),
            producer: reliable.clone(),
            cipher,
            keys: keys.clone(),
            engine: ComparisonEngine::new(CompareOptions {
                include_text_fields: config.adapter.compare_text_fields,
                log_skipped: config.adapter.log_skipped,
            }),
            metrics: Some(metrics.clone()),
        });

        let dispatcher = Arc::new(
            Dispatcher::new(ctx, deps.recorder.clone(), config.pipeline.retry_policy())
                .with_metrics(metrics.clone()),
        );

        let consumer = new_consumer(
            deps.transport.clone(),
            broker.endpoint_pool()?,
            broker.bindings()?,
            broker.exchange()?,
            broker.connection_settings(),
        );

        let supervisor = Arc::new(
            LivenessSupervisor::new(
                deps.store.clone(),
                Duration::from_secs(config.database.probe_interval_seconds),
            )
            .with_metrics(metrics.clone()),
        );

        let adapter = if config.adapter.enabled {
            let upstream = deps.upstream.clone().ok_or_else(|| AdapterError::Configuration {
                message: "the adapter is enabled but no upstream client was provided".to_string(),
            })?;
            let adapter = NotificationsAdapter::new(
                config.adapter.adapter_config(),
                upstream,
                deps.store.clone(),
            );
            Some(Arc::new(
                AdapterRunner::new(
                    adapter,
                    reliable,
                    keys.notification.clone(),
                    config.adapter.interval(),
                )
                .with_metrics(metrics.clone()),
            ))
        } else {
            None
        };

        info!(
            queues = consumer.bindings().len(),
            adapter = adapter.is_some(),
            "Service built"
        );

        Ok(Self {
            consumer,
            dispatcher,
            producer,
            supervisor,
            adapter,
            metrics,
        })
    }

    /// Routes for `/healthz` and `/metrics`
    pub fn router(&self) -> Router {
        health::router(HealthState {
            liveness: self.supervisor.liveness(),
            metrics: self.metrics.clone(),
        })
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Consume until `shutdown` flips to `true`
    ///
    /// Fails only when the consumer's initial broker connect fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ServiceError> {
        let probe = {
            let supervisor = self.supervisor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { supervisor.run(shutdown).await })
        };
        let adapter = self.adapter.clone().map(|runner| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run(shutdown).await })
        });

        let result = self.consumer.run(self.dispatcher.clone(), shutdown).await;

        if result.is_err() {
            probe.abort();
            if let Some(task) = &adapter {
                task.abort();
            }
        }
        let _ = probe.await;
        if let Some(task) = adapter {
            let _ = task.await;
        }

        self.producer.close().await;
        info!("Service stopped");
        Ok(result?)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
