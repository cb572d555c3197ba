//! # Service Configuration
//!
//! Layered configuration for the pipeline service.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//! 1. `/etc/notification-queue/service.yaml`
//! 2. `./config/service.yaml`
//! 3. The file named by `--config` or `NQ_CONFIG_FILE` (must exist)
//! 4. Nested environment variables, `NQ__SECTION__FIELD`
//! 5. The flat deployment variables (`NQ_URL`, `RABBITMQ_*`, `PORT`, ...)
//!
//! Every field carries a default, so an unconfigured environment still
//! deserializes; [`ServiceConfig::validate`] decides whether it can run.

use nq_broker::{
    BrokerError, ConnectionSettings, EndpointPool, ExchangeName, QueueBinding, RetryPolicy,
    RoutingKey,
};
use nq_core::adapter::{AdapterConfig, NameMapUrls};
use nq_core::CompareOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Prefix of the nested environment variables
pub const ENV_PREFIX: &str = "NQ";

/// Variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "NQ_CONFIG_FILE";

const SYSTEM_CONFIG_FILE: &str = "/etc/notification-queue/service";
const LOCAL_CONFIG_FILE: &str = "config/service";

// ============================================================================
// Error Types
// ============================================================================

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Configuration Sections
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub broker: BrokerConfig,
    pub routes: RoutesConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub adapter: AdapterSettings,
    pub pipeline: PipelineConfig,
    pub encryption: EncryptionConfig,
}

/// Broker endpoints and topology
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Primary and optional alternate endpoint (`NQ_URL`, `NQ_URL2`)
    pub urls: Vec<String>,

    /// Use the AMQPS endpoint instead of `urls` (`RABBITMQ_ENABLE_MESSAGES`)
    pub tls_enabled: bool,

    /// Comma-separated AMQPS endpoints (`RABBITMQ_AMQPS_ENDPOINT`)
    pub amqps_endpoint: Option<String>,

    /// Base64 PEM CA bundle (`RABBITMQ_TLS_CERT`)
    pub tls_cert: Option<String>,

    /// Input queues as `name:key` pairs (`NQ_QKEY`)
    pub queue_bindings: String,

    /// Durable direct exchange (`NQ_EXCHANGE_NAME`)
    pub exchange_name: String,

    /// Rounds over both endpoints before the boot connect gives up
    pub failover_rounds: Option<u32>,

    pub reconnect_backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            tls_enabled: false,
            amqps_endpoint: None,
            tls_cert: None,
            queue_bindings: "nq.incident:incident,nq.maintenance:maintenance,\
                             nq.resource:resource,nq.status:status,\
                             nq.notification:notification"
                .to_string(),
            exchange_name: "nq".to_string(),
            failover_rounds: None,
            reconnect_backoff_ms: nq_broker::RECONNECT_BACKOFF.as_millis() as u64,
        }
    }
}

impl BrokerConfig {
    /// Endpoints actually dialled
    pub fn effective_endpoints(&self) -> Vec<String> {
        if self.tls_enabled {
            self.amqps_endpoint
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            self.urls
                .iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect()
        }
    }

    /// A fresh endpoint pool; each session owns its own
    pub fn endpoint_pool(&self) -> Result<EndpointPool, BrokerError> {
        let endpoints = self.effective_endpoints();
        match (&self.tls_cert, self.tls_enabled) {
            (Some(cert), true) if !cert.trim().is_empty() => EndpointPool::with_tls(endpoints, cert),
            _ => EndpointPool::new(endpoints),
        }
    }

    pub fn bindings(&self) -> Result<Vec<QueueBinding>, BrokerError> {
        Ok(QueueBinding::parse_list(&self.queue_bindings)?)
    }

    pub fn exchange(&self) -> Result<ExchangeName, BrokerError> {
        Ok(ExchangeName::new(self.exchange_name.clone())?)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            retry: RetryPolicy::default(),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            failover_rounds: self.failover_rounds,
        }
    }
}

/// Output routing keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub case: String,
    pub incident: String,
    pub incident_bulk: String,
    pub maintenance: String,
    pub resource: String,
    pub notification: String,
    pub notification_sub: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            case: "nq2ds.case".to_string(),
            incident: "nq2ds.incident".to_string(),
            incident_bulk: "nq2ds.incident_bulk".to_string(),
            maintenance: "nq2ds.maintenance".to_string(),
            resource: "nq2ds.resource".to_string(),
            notification: "nq2ds.notification".to_string(),
            notification_sub: "nq2ds.notification_sub".to_string(),
        }
    }
}

impl RoutesConfig {
    fn named(&self) -> [(&'static str, &str); 7] {
        [
            ("routes.case", self.case.as_str()),
            ("routes.incident", self.incident.as_str()),
            ("routes.incident_bulk", self.incident_bulk.as_str()),
            ("routes.maintenance", self.maintenance.as_str()),
            ("routes.resource", self.resource.as_str()),
            ("routes.notification", self.notification.as_str()),
            ("routes.notification_sub", self.notification_sub.as_str()),
        ]
    }
}

/// Notification store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL (`DATABASE_URL`)
    pub url: String,

    /// Pool size cap (`DB_MAX_OPEN_CONNS`)
    pub max_open_connections: Option<u32>,

    /// Liveness probe period
    pub probe_interval_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_open_connections: None,
            probe_interval_seconds: 10,
        }
    }
}

/// Liveness and metrics server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    /// Listen port (`PORT`)
    pub port: u16,

    /// Grace period for in-flight work after a shutdown signal
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging and span tagging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,

    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Application name tagged on every span (`NR_APPNAME`)
    pub app_name: String,

    /// Telemetry sink licence (`NR_LICENSE`); never serialized
    #[serde(skip_serializing)]
    pub license: Option<String>,

    /// Alternate sink service name (`INSTANA_SERVICE_NAME`)
    pub service_name: Option<String>,

    /// `KUBE_APP_DEPLOYED_ENV`
    pub deployed_env: String,

    /// `KUBE_CLUSTER_REGION`
    pub cluster_region: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: "nq_service=info,nq_core=info,nq_broker=info".to_string(),
            app_name: "nq-service".to_string(),
            license: None,
            service_name: None,
            deployed_env: String::new(),
            cluster_region: String::new(),
        }
    }
}

/// Notifications adapter pre-stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub notifications_url: String,
    pub services_url: String,
    pub runtimes_url: String,
    pub platforms_url: String,
    pub catalog_url: String,

    /// Basic-auth user; the password comes from the secret store
    pub username: Option<String>,

    pub cache_ttl_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub max_age_days: i64,
    pub default_source: String,
    pub compare_text_fields: bool,
    pub log_skipped: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 300,
            notifications_url: String::new(),
            services_url: String::new(),
            runtimes_url: String::new(),
            platforms_url: String::new(),
            catalog_url: String::new(),
            username: None,
            cache_ttl_seconds: nq_core::adapter::DEFAULT_CACHE_TTL.as_secs(),
            fetch_timeout_seconds: nq_core::adapter::upstream::DEFAULT_FETCH_TIMEOUT.as_secs(),
            max_age_days: nq_core::adapter::DEFAULT_MAX_AGE_DAYS,
            default_source: "catalog".to_string(),
            compare_text_fields: false,
            log_skipped: false,
        }
    }
}

impl AdapterSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// The adapter's own configuration
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            notifications_url: self.notifications_url.clone(),
            name_maps: NameMapUrls {
                services: self.services_url.clone(),
                runtimes: self.runtimes_url.clone(),
                platforms: self.platforms_url.clone(),
            },
            catalog_url: self.catalog_url.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            max_age: chrono::Duration::days(self.max_age_days),
            default_source: self.default_source.clone(),
            compare: CompareOptions {
                include_text_fields: self.compare_text_fields,
                log_skipped: self.log_skipped,
            },
        }
    }
}

/// Handler retry and producer pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts per delivery for transient handler failures
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Pause between outer publish attempts
    pub producer_pacing_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_initial_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            producer_pacing_seconds: nq_broker::RETRY_WAIT.as_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.retry_attempts,
            Duration::from_millis(self.retry_initial_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn producer_pacing(&self) -> Duration {
        Duration::from_secs(self.producer_pacing_seconds)
    }
}

/// Payload key lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Secret holding the AES key
    pub key_secret: String,

    /// Prefix applied to every secret name looked up in the environment
    pub secret_prefix: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_secret: nq_core::secrets::StandardSecrets::ENCRYPTION_KEY.to_string(),
            secret_prefix: None,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl ServiceConfig {
    /// Load from files and the process environment
    ///
    /// `explicit` wins over `NQ_CONFIG_FILE`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit: Option<PathBuf> = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var(CONFIG_FILE_ENV)
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name(SYSTEM_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name(LOCAL_CONFIG_FILE)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = &explicit {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let mut service_config: ServiceConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        service_config.apply_env(|key| std::env::var(key).ok())?;
        Ok(service_config)
    }

    /// Apply the flat deployment variables
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let primary = get("NQ_URL");
        let alternate = get("NQ_URL2");
        if primary.is_some() || alternate.is_some() {
            self.broker.urls = primary.into_iter().chain(alternate).collect();
        }
        if let Some(value) = get("RABBITMQ_ENABLE_MESSAGES") {
            self.broker.tls_enabled = value.trim().eq_ignore_ascii_case("true");
        }
        if let Some(value) = get("RABBITMQ_AMQPS_ENDPOINT") {
            self.broker.amqps_endpoint = Some(value);
        }
        if let Some(value) = get("RABBITMQ_TLS_CERT") {
            self.broker.tls_cert = Some(value);
        }
        if let Some(value) = get("NQ_QKEY") {
            self.broker.queue_bindings = value;
        }
        if let Some(value) = get("NQ_EXCHANGE_NAME") {
            self.broker.exchange_name = value;
        }

        for (key, slot) in [
            ("NQ_CASE_OUT_QKEY", &mut self.routes.case),
            ("NQ_INCIDENT_OUT_QKEY", &mut self.routes.incident),
            ("NQ_INCIDENT_BULK_OUT_QKEY", &mut self.routes.incident_bulk),
            ("NQ_MAINTENANCE_OUT_QKEY", &mut self.routes.maintenance),
            ("NQ_RESOURCE_OUT_QKEY", &mut self.routes.resource),
            ("NQ_NOTIFICATION_OUT_QKEY", &mut self.routes.notification),
            ("NQ_NOTIFICATION_SUB_OUT_QKEY", &mut self.routes.notification_sub),
        ] {
            if let Some(value) = get(key) {
                *slot = value;
            }
        }

        if let Some(value) = get("DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = get("DB_MAX_OPEN_CONNS") {
            self.database.max_open_connections = Some(parse_number("DB_MAX_OPEN_CONNS", &value)?);
        }

        if let Some(value) = get("KUBE_APP_DEPLOYED_ENV") {
            self.telemetry.deployed_env = value;
        }
        if let Some(value) = get("KUBE_CLUSTER_REGION") {
            self.telemetry.cluster_region = value;
        }
        if let Some(value) = get("NR_APPNAME") {
            self.telemetry.app_name = value;
        }
        if let Some(value) = get("NR_LICENSE") {
            self.telemetry.license = Some(value);
        }
        if let Some(value) = get("INSTANA_SERVICE_NAME") {
            self.telemetry.service_name = Some(value);
        }

        if let Some(value) = get("PORT") {
            self.server.port = parse_number("PORT", &value)?;
        }
        Ok(())
    }

    /// Check that the configuration can run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.tls_enabled
            && self
                .broker
                .amqps_endpoint
                .as_deref()
                .map_or(true, |e| e.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "broker.amqps_endpoint",
                "TLS is enabled but no AMQPS endpoint is configured",
            ));
        }

        let endpoints = self.broker.effective_endpoints();
        if endpoints.is_empty() {
            return Err(ConfigError::invalid("broker.urls", "at least one endpoint is required"));
        }
        if endpoints.len() > 2 {
            return Err(ConfigError::invalid(
                "broker.urls",
                format!("at most two endpoints are supported, got {}", endpoints.len()),
            ));
        }
        self.broker
            .endpoint_pool()
            .map_err(|e| ConfigError::invalid("broker.urls", e.to_string()))?;

        self.broker
            .bindings()
            .map_err(|e| ConfigError::invalid("broker.queue_bindings", e.to_string()))?;

        if self.broker.exchange_name.trim().is_empty() {
            return Err(ConfigError::invalid("broker.exchange_name", "must not be empty"));
        }
        self.broker
            .exchange()
            .map_err(|e| ConfigError::invalid("broker.exchange_name", e.to_string()))?;

        for (field, key) in self.routes.named() {
            RoutingKey::new(key).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::invalid("database.url", "a database URL is required"));
        }
        if self.database.probe_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "database.probe_interval_seconds",
                "must be greater than zero",
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must not be 0"));
        }

        if self.pipeline.retry_attempts == 0 {
            return Err(ConfigError::invalid("pipeline.retry_attempts", "must be at least 1"));
        }

        if self.adapter.enabled {
            if self.adapter.notifications_url.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "adapter.notifications_url",
                    "required when the adapter is enabled",
                ));
            }
            if self.adapter.interval_seconds == 0 {
                return Err(ConfigError::invalid(
                    "adapter.interval_seconds",
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_seconds)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
