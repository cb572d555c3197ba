//! HTTP access to the upstream documents read by the notifications adapter.

use crate::secrets::SecretValue;
use crate::store::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Upstream {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Document from {url} could not be parsed: {message}")]
    Parse { url: String, message: String },

    #[error("Adapter configuration is invalid: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdapterError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Store(e) => e.is_transient(),
            Self::Parse { .. } | Self::Configuration { .. } => false,
        }
    }

    pub(crate) fn parse(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Fetches raw upstream documents
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, AdapterError>;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Basic-auth credentials for the upstream documents
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretValue,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretValue) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// `reqwest`-backed [`UpstreamClient`]
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl HttpUpstreamClient {
    pub fn new(credentials: Option<Credentials>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nq-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch(&self, url: &str) -> Result<Bytes, AdapterError> {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(
                &credentials.username,
                Some(credentials.password.expose_secret()),
            );
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        debug!(url = %url, bytes = body.len(), "Fetched upstream document");
        Ok(body)
    }
}

fn classify(url: &str, err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout {
            url: url.to_string(),
        }
    } else {
        AdapterError::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "upstream_tests.rs"]
mod tests;
