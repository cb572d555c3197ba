//! # Liveness
//!
//! The [`LivenessSupervisor`] probes the notification store on a fixed
//! interval. A failed probe marks the service unhealthy and reopens the
//! store's connection pool; the next successful probe marks it healthy again.
//! The HTTP [`router`] exposes the last probe result at `GET /healthz` and the
//! pipeline counters at `GET /metrics`.

use crate::metrics::PipelineMetrics;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use nq_core::NotificationStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ============================================================================
// Supervisor
// ============================================================================

/// Periodic store probe with pool rebuild on failure
pub struct LivenessSupervisor {
    store: Arc<dyn NotificationStore>,
    interval: Duration,
    healthy: Arc<AtomicBool>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl LivenessSupervisor {
    /// Starts healthy: the store was reachable when the service booted
    pub fn new(store: Arc<dyn NotificationStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            healthy: Arc::new(AtomicBool::new(true)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared view of the last probe result
    pub fn liveness(&self) -> Liveness {
        Liveness(self.healthy.clone())
    }

    /// Probe once; on failure reopen the pool. Returns the probe result.
    pub async fn probe_once(&self) -> bool {
        if self.store.is_active().await {
            if !self.healthy.swap(true, Ordering::SeqCst) {
                info!("Notification store reachable again");
            }
            return true;
        }

        self.healthy.store(false, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.liveness_probe_failures_total.inc();
        }
        warn!("Notification store probe failed, reopening pool");

        if let Err(e) = self.store.reset().await {
            error!(error = %e, "Notification store pool could not be reopened");
        }
        false
    }

    /// Probe every interval until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Liveness supervisor stopped");
                        return;
                    }
                }
            }
        }
    }
}

/// Read-only handle on the supervisor's health flag
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// HTTP Surface
// ============================================================================

/// State shared by the liveness and metrics handlers
#[derive(Clone)]
pub struct HealthState {
    pub liveness: Liveness,
    pub metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Routes for `/healthz` and `/metrics`
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_healthz(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION");
    if state.liveness.is_healthy() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                version,
            }),
        )
    }
}

async fn metrics_endpoint(State(state): State<HealthState>) -> Result<String, StatusCode> {
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
