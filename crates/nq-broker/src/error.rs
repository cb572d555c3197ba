//! Error types for broker sessions.

use std::time::Duration;
use thiserror::Error;

/// Failures raised by broker transports and sessions
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Authentication against {endpoint} failed: {message}")]
    AuthenticationFailed { endpoint: String, message: String },

    #[error("All broker endpoints exhausted after {attempts} attempts")]
    EndpointsExhausted { attempts: u32 },

    #[error("Channel closed: {reason}")]
    ChannelClosed { reason: String },

    #[error("Exchange '{exchange}' not found")]
    ExchangeNotFound { exchange: String },

    #[error("Queue '{queue}' not found")]
    QueueNotFound { queue: String },

    #[error("Declaration of {entity} failed: {message}")]
    DeclareFailed { entity: String, message: String },

    #[error("Publish to routing key '{routing_key}' failed: {message}")]
    PublishFailed {
        routing_key: String,
        message: String,
    },

    #[error("Delivery {delivery_tag} could not be settled: {message}")]
    SettleFailed { delivery_tag: u64, message: String },

    #[error("TLS configuration error: {message}")]
    Tls { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl BrokerError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::EndpointsExhausted { .. } => false,
            Self::ChannelClosed { .. } => true,
            Self::ExchangeNotFound { .. } => false,
            Self::QueueNotFound { .. } => false,
            Self::DeclareFailed { .. } => true,
            Self::PublishFailed { .. } => true,
            Self::SettleFailed { .. } => true,
            Self::Tls { .. } => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ConnectionFailed { .. } => Some(crate::RETRY_WAIT),
            Self::ChannelClosed { .. } => Some(crate::RECONNECT_BACKOFF),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
