//! # NQ Service
//!
//! The notification pipeline process: consumes inbound events from the
//! broker, runs the matching handler, persists notification rows and fans the
//! results out on the output routing keys.
//!
//! This crate wires the pieces together:
//! - [`config`]: layered configuration from files and the environment
//! - [`dispatcher`]: routing-key switch and acknowledge policy
//! - [`handlers`]: one handler per inbound event kind
//! - [`producer`]: encrypted publishing that retries until the broker accepts
//! - [`health`]: store liveness probe and the `/healthz` and `/metrics` routes
//! - [`adapter_runner`]: the scheduled upstream notifications pull
//! - [`service`]: construction and lifecycle of a running pipeline

pub mod adapter_runner;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod producer;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
pub use dispatcher::Dispatcher;
pub use handlers::{HandlerContext, OutputKeys};
pub use health::{HealthState, Liveness, LivenessSupervisor};
pub use metrics::PipelineMetrics;
pub use producer::ReliableProducer;
pub use service::{Dependencies, Service};
pub use telemetry::{init_tracing, TracingRecorder};

use nq_broker::BrokerError;
use nq_core::adapter::AdapterError;
use nq_core::secrets::SecretError;
use nq_core::{EncryptionError, StoreError};

// ============================================================================
// Error Types
// ============================================================================

/// Failures that stop the service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Secret unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("Encryption key rejected: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Notification store unavailable: {0}")]
    Database(#[from] StoreError),

    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("Adapter setup failed: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Telemetry setup failed: {message}")]
    Telemetry { message: String },

    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } | Self::ServerFailed { .. } => 2,
            Self::Configuration(_) | Self::Adapter(_) | Self::Telemetry { .. } => 3,
            Self::Database(_) => 4,
            Self::Broker(_) => 5,
            Self::Secret(_) | Self::Encryption(_) => 6,
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
