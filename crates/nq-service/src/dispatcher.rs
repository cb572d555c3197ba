//! # Event Dispatcher
//!
//! Maps each delivery to its handler by routing key and turns the handler
//! result into an acknowledge decision:
//!
//! | Handler result | Action |
//! |---|---|
//! | `Ok` | ack |
//! | `Transient` | retried in place, then nack with requeue once the budget is spent |
//! | `DecryptFailed`, `BadMessage`, `Fatal` | reject without requeue (dead-lettered) |
//!
//! Unknown routing keys are acknowledged and logged. Every handled delivery
//! records one span named after its event kind.

use crate::handlers::{self, HandlerContext};
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use nq_broker::{Delivery, DeliveryAction, DeliveryHandler, RetryPolicy, RetryState};
use nq_core::events::EventKind;
use nq_core::monitoring::Recorder;
use nq_core::PipelineError;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Routing-key switch over the handler table
pub struct Dispatcher {
    ctx: Arc<HandlerContext>,
    recorder: Arc<dyn Recorder>,
    retry: RetryPolicy,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<HandlerContext>, recorder: Arc<dyn Recorder>, retry: RetryPolicy) -> Self {
        Self {
            ctx,
            recorder,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle one payload and decide how to settle it
    pub async fn dispatch(&self, routing_key: &str, payload: &[u8]) -> DeliveryAction {
        let Some(kind) = EventKind::from_routing_key(routing_key) else {
            warn!(routing_key = %routing_key, "No handler for routing key, acknowledging");
            self.record_outcome(routing_key, "ignored");
            return DeliveryAction::Ack;
        };

        let mut span = self.recorder.start_span(kind.as_str());
        span.set_tag("routing_key", routing_key);

        let mut state = RetryState::new();
        let action = loop {
            state.record_attempt();
            match handlers::handle(kind, &self.ctx, payload, &mut span).await {
                Ok(()) => break DeliveryAction::Ack,
                Err(e) if e.is_transient() && state.can_retry(&self.retry) => {
                    let delay = state.next_delay(&self.retry);
                    warn!(
                        routing_key = %routing_key,
                        attempt = state.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient handler failure, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics
                            .handler_retries_total
                            .with_label_values(&[routing_key])
                            .inc();
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let category = e.error_category();
                    span.set_error(e.to_string());
                    span.set_tag("error_category", category.as_str());
                    error!(
                        routing_key = %routing_key,
                        attempts = state.attempts,
                        category = %category,
                        error = %e,
                        "Delivery failed"
                    );
                    break action_for(&e);
                }
            }
        };

        let outcome = outcome_label(action);
        span.set_tag("outcome", outcome);
        span.finish();
        self.record_outcome(routing_key, outcome);
        debug!(routing_key = %routing_key, outcome, "Delivery settled");
        action
    }

    fn record_outcome(&self, routing_key: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.delivery(routing_key, outcome);
        }
    }
}

#[async_trait]
impl DeliveryHandler for Dispatcher {
    async fn handle(&self, delivery: &Delivery) -> DeliveryAction {
        self.dispatch(&delivery.routing_key, &delivery.body).await
    }
}

/// Settle decision for a handler error once in-place retries are over
pub fn action_for(error: &PipelineError) -> DeliveryAction {
    match error {
        PipelineError::Transient { .. } => DeliveryAction::Nack { requeue: true },
        PipelineError::DecryptFailed { .. }
        | PipelineError::BadMessage { .. }
        | PipelineError::Fatal { .. } => DeliveryAction::Reject { requeue: false },
    }
}

fn outcome_label(action: DeliveryAction) -> &'static str {
    match action {
        DeliveryAction::Ack => "ack",
        DeliveryAction::Reject { .. } => "reject",
        DeliveryAction::Nack { .. } => "nack",
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
