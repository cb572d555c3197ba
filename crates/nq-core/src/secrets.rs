//! # Secrets Module
//!
//! Key/value secret access for the encryption key and upstream credentials.
//!
//! Secret values are zeroized on drop and never appear in `Debug` output.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use zeroize::Zeroizing;

// ============================================================================
// Core Types
// ============================================================================

/// Secret identifier
///
/// Names follow environment variable conventions so the environment-backed
/// store can resolve them directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretName(String);

impl SecretName {
    /// Create new secret name with validation
    ///
    /// # Validation Rules
    /// - Must be 1-127 characters
    /// - Only ASCII alphanumerics, `_` and `-`
    pub fn new(name: impl Into<String>) -> Result<Self, SecretError> {
        let name = name.into();

        if name.is_empty() {
            return Err(SecretError::InvalidName {
                name,
                reason: "Secret name cannot be empty".to_string(),
            });
        }

        if name.len() > 127 {
            return Err(SecretError::InvalidName {
                name,
                reason: "Secret name exceeds 127 character limit".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SecretError::InvalidName {
                name,
                reason: "Secret name contains invalid characters".to_string(),
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecretName {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Secure container for secret values
#[derive(Clone)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    pub fn from_string(value: String) -> Self {
        Self {
            inner: Zeroizing::new(value),
        }
    }

    /// Get secret as string (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Length without exposing content
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("length", &self.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {name}")]
    NotFound { name: String },

    #[error("Invalid secret name: {name} - {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Secret store unavailable: {message}")]
    Unavailable { message: String },
}

impl SecretError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

// ============================================================================
// Standard Secret Names
// ============================================================================

/// Secrets read by the pipeline
pub struct StandardSecrets;

impl StandardSecrets {
    /// Payload encryption key (base64 or hex of 32 bytes)
    pub const ENCRYPTION_KEY: &'static str = "NQ_ENCRYPTION_KEY";

    /// Password for the upstream notification and name-map documents
    pub const ADAPTER_PASSWORD: &'static str = "NQ_ADAPTER_PASSWORD";

    pub fn encryption_key() -> SecretName {
        SecretName(Self::ENCRYPTION_KEY.to_string())
    }

    pub fn adapter_password() -> SecretName {
        SecretName(Self::ADAPTER_PASSWORD.to_string())
    }
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Key/value secret fetcher
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, SecretError>;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Secrets taken from process environment variables
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look secrets up as `{prefix}{name}`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable(&self, name: &SecretName) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, SecretError> {
        let variable = self.variable(name);
        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => Ok(SecretValue::from_string(value)),
            _ => Err(SecretError::NotFound { name: variable }),
        }
    }
}

/// Secrets held in memory, for tests and local runs
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<SecretName, SecretValue>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: SecretName, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&self, name: SecretName, value: impl Into<String>) {
        let mut secrets = self
            .secrets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        secrets.insert(name, SecretValue::from_string(value.into()));
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, SecretError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| SecretError::Unavailable {
                message: "secret map lock poisoned".to_string(),
            })?;
        secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
