//! Scheduled notifications adapter runs.
//!
//! Each run pulls the upstream notification feed through the
//! [`NotificationsAdapter`] and produces every resulting message on the
//! notification output key. A failed run is logged and retried at the next
//! interval.

use crate::metrics::PipelineMetrics;
use crate::producer::ReliableProducer;
use nq_broker::RoutingKey;
use nq_core::adapter::{AdapterError, NotificationsAdapter};
use nq_core::PipelineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Errors from one adapter run
#[derive(Debug, thiserror::Error)]
pub enum AdapterRunError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Produce(#[from] PipelineError),
}

pub struct AdapterRunner {
    adapter: NotificationsAdapter,
    producer: Arc<ReliableProducer>,
    routing_key: RoutingKey,
    interval: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl AdapterRunner {
    pub fn new(
        adapter: NotificationsAdapter,
        producer: Arc<ReliableProducer>,
        routing_key: RoutingKey,
        interval: Duration,
    ) -> Self {
        Self {
            adapter,
            producer,
            routing_key,
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the adapter once and produce its messages; returns how many
    pub async fn run_once(&self) -> Result<usize, AdapterRunError> {
        let run = self.adapter.run_once().await?;

        for message in &run.messages {
            self.producer.produce(&self.routing_key, message).await?;
        }

        if let Some(metrics) = &self.metrics {
            metrics.adapter_deltas_total.inc_by(run.messages.len() as u64);
        }
        info!(
            fetched = run.fetched,
            dropped_old = run.dropped_old,
            produced = run.messages.len(),
            bulk = run.bulk,
            "Adapter run complete"
        );
        Ok(run.messages.len())
    }

    /// Run immediately and then every interval until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = match self.run_once().await {
                        Ok(_) => "ok",
                        Err(e) => {
                            error!(error = %e, "Adapter run failed");
                            "error"
                        }
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.adapter_runs_total.with_label_values(&[result]).inc();
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Adapter runner stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "adapter_runner_tests.rs"]
mod tests;
