//! # NQ Core
//!
//! Domain logic for the notification ingestion and fan-out pipeline.
//!
//! This crate contains everything the pipeline needs that does not touch the
//! broker directly:
//! - The [`Notification`] model, CRN handling and the inbound event payloads
//! - The encryption gateway applied to every broker payload
//! - The notification store gateway (in-memory and PostgreSQL)
//! - The comparison engine that reduces a batch to its material changes
//! - The notifications adapter with its upstream, name-map and catalog caches
//! - Secret access and the span [`monitoring::Recorder`]
//!
//! ## Architecture
//!
//! Business logic depends only on trait abstractions (`NotificationStore`,
//! `Cipher`, `SecretStore`, `UpstreamClient`, `Recorder`); implementations are
//! injected by the service at startup.
//!
//! ## Usage
//!
//! ```rust
//! use nq_core::{ComparisonEngine, Notification};
//!
//! let existing = vec![Notification::new("demo", "A1", "crn:v1::::::::")];
//! let incoming = existing.clone();
//!
//! let engine = ComparisonEngine::default();
//! assert!(engine.compare_and_emit(&existing, &incoming).is_empty());
//! ```

use serde::{Deserialize, Serialize};

pub mod adapter;
pub mod compare;
pub mod crn;
pub mod encryption;
pub mod events;
pub mod monitoring;
pub mod notification;
pub mod resource;
pub mod secrets;
pub mod store;
pub mod time;

pub use compare::{CompareOptions, CompareReport, ComparisonEngine, UpdateReason};
pub use crn::{Crn, GENERIC_CRN};
pub use encryption::{AesGcmCipher, Cipher, EncryptionError};
pub use notification::{
    LocalizedText, MessageType, Notification, NotificationKey, NotificationMessage,
};
pub use resource::CloudResource;
pub use store::{NotificationStore, QueryFilter, StoreError};

/// Standard result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

// ============================================================================
// Error Types
// ============================================================================

/// Validation errors for domain values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Outcome categories a handler can fail with
///
/// The dispatcher maps these onto acknowledge, dead-letter or in-place retry.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Payload could not be decrypted: {message}")]
    DecryptFailed { message: String },

    #[error("Bad message: {reason}")]
    BadMessage { reason: String },

    #[error("Transient failure: {reason}")]
    Transient { reason: String },

    #[error("Fatal failure: {reason}")]
    Fatal { reason: String },
}

/// Span tag values for [`PipelineError::error_category`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    DecryptFailed,
    BadMessage,
    Transient,
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecryptFailed => "decrypt-failed",
            Self::BadMessage => "bad-message",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PipelineError {
    pub fn bad_message(reason: impl Into<String>) -> Self {
        Self::BadMessage {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if the delivery may be retried in place
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Category recorded on the handler span
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::DecryptFailed { .. } => ErrorCategory::DecryptFailed,
            Self::BadMessage { .. } => ErrorCategory::BadMessage,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Fatal { .. } => ErrorCategory::Fatal,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            match err {
                StoreError::NotFound { .. }
                | StoreError::Validation(_)
                | StoreError::InvalidFilter { .. } => Self::bad_message(err.to_string()),
                other => Self::fatal(other.to_string()),
            }
        }
    }
}

impl From<EncryptionError> for PipelineError {
    fn from(err: EncryptionError) -> Self {
        match err {
            EncryptionError::Decrypt { message } => Self::DecryptFailed { message },
            other => Self::fatal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_message(format!("payload is not valid JSON for this event: {}", err))
    }
}

impl From<ValidationError> for PipelineError {
    fn from(err: ValidationError) -> Self {
        Self::bad_message(err.to_string())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
