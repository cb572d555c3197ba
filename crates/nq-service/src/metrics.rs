//! Prometheus counters for the pipeline.
//!
//! Counters live in a private [`Registry`] so several services can coexist
//! in one process (tests build one per case). `GET /metrics` renders it.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Pipeline metrics
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    registry: Registry,

    /// Deliveries by input routing key and outcome (`ack`, `reject`, `nack`)
    pub deliveries_total: IntCounterVec,

    /// In-place handler retries by input routing key
    pub handler_retries_total: IntCounterVec,

    /// Messages published by output routing key
    pub messages_produced_total: IntCounterVec,

    /// Outer publish attempts that failed and were paced
    pub producer_retries_total: IntCounter,

    /// Maintenance records that matched no change-record heuristic
    pub maintenance_unmatched_total: IntCounter,

    pub liveness_probe_failures_total: IntCounter,

    /// Adapter runs by result (`ok`, `error`)
    pub adapter_runs_total: IntCounterVec,

    pub adapter_deltas_total: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some("nq".to_string()), None)?;

        let deliveries_total = IntCounterVec::new(
            Opts::new("deliveries_total", "Deliveries settled by routing key and outcome"),
            &["routing_key", "outcome"],
        )?;
        let handler_retries_total = IntCounterVec::new(
            Opts::new("handler_retries_total", "In-place retries of transient handler failures"),
            &["routing_key"],
        )?;
        let messages_produced_total = IntCounterVec::new(
            Opts::new("messages_produced_total", "Messages published by output routing key"),
            &["routing_key"],
        )?;
        let producer_retries_total = IntCounter::new(
            "producer_retries_total",
            "Publish attempts that failed after the inner retry budget",
        )?;
        let maintenance_unmatched_total = IntCounter::new(
            "maintenance_unmatched_total",
            "Maintenance records not recognised as change records",
        )?;
        let liveness_probe_failures_total = IntCounter::new(
            "liveness_probe_failures_total",
            "Store liveness probes that failed",
        )?;
        let adapter_runs_total = IntCounterVec::new(
            Opts::new("adapter_runs_total", "Notifications adapter runs by result"),
            &["result"],
        )?;
        let adapter_deltas_total = IntCounter::new(
            "adapter_deltas_total",
            "Notification deltas produced by the adapter",
        )?;

        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(handler_retries_total.clone()))?;
        registry.register(Box::new(messages_produced_total.clone()))?;
        registry.register(Box::new(producer_retries_total.clone()))?;
        registry.register(Box::new(maintenance_unmatched_total.clone()))?;
        registry.register(Box::new(liveness_probe_failures_total.clone()))?;
        registry.register(Box::new(adapter_runs_total.clone()))?;
        registry.register(Box::new(adapter_deltas_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            deliveries_total,
            handler_retries_total,
            messages_produced_total,
            producer_retries_total,
            maintenance_unmatched_total,
            liveness_probe_failures_total,
            adapter_runs_total,
            adapter_deltas_total,
        }))
    }

    pub fn delivery(&self, routing_key: &str, outcome: &str) {
        self.deliveries_total
            .with_label_values(&[routing_key, outcome])
            .inc();
    }

    pub fn produced(&self, routing_key: &str) {
        self.messages_produced_total
            .with_label_values(&[routing_key])
            .inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
