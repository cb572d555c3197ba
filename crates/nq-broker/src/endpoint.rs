//! Broker endpoint pool with primary/alternate failover.
//!
//! A pool holds one or two endpoints. Two endpoints are alternates, never a
//! cluster: only the endpoint "in use" is connected at any time.

use crate::error::{BrokerError, ConfigurationError, ValidationError};
use base64::Engine;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;

/// TLS settings for `amqps://` endpoints
#[derive(Clone, PartialEq, Eq)]
pub struct TlsConfig {
    ca_pem: String,
}

impl TlsConfig {
    /// Minimum protocol version negotiated by the transports
    pub const MIN_PROTOCOL_VERSION: &'static str = "TLSv1.2";

    /// Build from a base64-encoded PEM CA bundle
    pub fn from_base64_pem(encoded: &str) -> Result<Self, BrokerError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| BrokerError::Tls {
                message: format!("CA bundle is not valid base64: {}", e),
            })?;
        let pem = String::from_utf8(decoded).map_err(|_| BrokerError::Tls {
            message: "CA bundle is not valid UTF-8".to_string(),
        })?;
        Self::from_pem(pem)
    }

    /// Build from a PEM CA bundle
    pub fn from_pem(pem: String) -> Result<Self, BrokerError> {
        if !pem.contains("-----BEGIN CERTIFICATE-----") {
            return Err(BrokerError::Tls {
                message: "CA bundle contains no PEM certificate".to_string(),
            });
        }
        Ok(Self { ca_pem: pem })
    }

    /// PEM-encoded CA chain
    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_pem_len", &self.ca_pem.len())
            .finish()
    }
}

/// One or two broker endpoints plus the index currently in use
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<String>,
    tls: Option<TlsConfig>,
    in_use: AtomicUsize,
    pinned: AtomicBool,
}

impl EndpointPool {
    /// Create a pool from a plain endpoint list
    pub fn new<I, S>(endpoints: I) -> Result<Self, BrokerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if endpoints.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "broker endpoint".to_string(),
            }
            .into());
        }

        if endpoints.len() > 2 {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "at most two broker endpoints are supported, got {}",
                    endpoints.len()
                ),
            }
            .into());
        }

        for endpoint in &endpoints {
            validate_endpoint(endpoint)?;
        }

        Ok(Self {
            endpoints,
            tls: None,
            in_use: AtomicUsize::new(0),
            pinned: AtomicBool::new(false),
        })
    }

    /// Create a pool whose connections use TLS with the given base64 CA bundle
    pub fn with_tls<I, S>(endpoints: I, ca_bundle_base64: &str) -> Result<Self, BrokerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new(endpoints)?;
        pool.tls = Some(TlsConfig::from_base64_pem(ca_bundle_base64)?);
        Ok(pool)
    }

    /// TLS settings, if any
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Number of endpoints (1 or 2)
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Pools are never empty; provided for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Whether an alternate endpoint exists
    pub fn has_alternate(&self) -> bool {
        self.endpoints.len() > 1
    }

    /// Endpoint currently in use
    pub fn current(&self) -> &str {
        &self.endpoints[self.in_use.load(Ordering::Acquire) % self.endpoints.len()]
    }

    /// Index of the endpoint currently in use
    pub fn current_index(&self) -> usize {
        self.in_use.load(Ordering::Acquire) % self.endpoints.len()
    }

    /// Switch to the alternate endpoint and return it
    ///
    /// With a single endpoint this returns the same endpoint.
    pub fn switch_to_alternate(&self) -> &str {
        let len = self.endpoints.len();
        let next = (self.current_index() + 1) % len;
        self.in_use.store(next, Ordering::Release);
        &self.endpoints[next]
    }

    /// Record the first successful connect; later calls are ignored
    pub fn pin_current(&self) -> bool {
        !self.pinned.swap(true, Ordering::AcqRel)
    }

    /// Whether a first successful connect has happened
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// All endpoints in configuration order
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

/// Strip credentials from an endpoint URL for logging
pub fn redact_endpoint(endpoint: &str) -> String {
    match Url::parse(endpoint) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid endpoint>".to_string(),
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let url = Url::parse(endpoint).map_err(|e| ValidationError::InvalidFormat {
        field: "broker_endpoint".to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "amqp" | "amqps" => Ok(()),
        other => Err(ValidationError::InvalidFormat {
            field: "broker_endpoint".to_string(),
            message: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
