//! # Telemetry
//!
//! Log subscriber bootstrap and the `tracing`-backed span recorder.
//!
//! Handler spans are emitted as one structured event per finished span on the
//! `nq_service::spans` target. Every span carries the deployment tags
//! (`deployed_env`, `cluster_region`, `app_name`) so the log shipper can route
//! them to the telemetry sink without further enrichment.

use crate::config::{LogFormat, TelemetryConfig};
use nq_core::monitoring::{Recorder, Span, SpanRecord, SpanSink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured filter. Fails when a subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| format!("invalid log filter '{}': {}", config.log_filter, e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| e.to_string())
}

// ============================================================================
// Span Recorder
// ============================================================================

/// Recorder that logs finished spans through `tracing`
#[derive(Clone)]
pub struct TracingRecorder {
    base_tags: Arc<BTreeMap<String, String>>,
    sink: Arc<TracingSink>,
}

impl TracingRecorder {
    pub fn new(config: &TelemetryConfig) -> Self {
        let mut base_tags = BTreeMap::new();
        base_tags.insert("app_name".to_string(), config.app_name.clone());
        base_tags.insert("deployed_env".to_string(), config.deployed_env.clone());
        base_tags.insert("cluster_region".to_string(), config.cluster_region.clone());
        if let Some(service) = &config.service_name {
            base_tags.insert("service_name".to_string(), service.clone());
        }

        if config.license.is_none() {
            info!(app_name = %config.app_name, "No telemetry licence configured; spans are logged only");
        }

        Self {
            base_tags: Arc::new(base_tags),
            sink: Arc::new(TracingSink),
        }
    }

    /// Tags applied to every span
    pub fn base_tags(&self) -> &BTreeMap<String, String> {
        &self.base_tags
    }
}

impl Recorder for TracingRecorder {
    fn start_span(&self, name: &str) -> Span {
        let mut span = Span::new(name, self.sink.clone());
        span.set_tags(self.base_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        span
    }
}

struct TracingSink;

impl SpanSink for TracingSink {
    fn record(&self, span: SpanRecord) {
        let tags = serde_json::to_string(&span.tags).unwrap_or_default();
        let duration_ms = span.duration.as_millis() as u64;
        match &span.error {
            Some(error) => warn!(
                target: "nq_service::spans",
                span = %span.name,
                duration_ms,
                error = %error,
                tags = %tags,
                "span finished with error"
            ),
            None => info!(
                target: "nq_service::spans",
                span = %span.name,
                duration_ms,
                tags = %tags,
                "span finished"
            ),
        }
    }
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
