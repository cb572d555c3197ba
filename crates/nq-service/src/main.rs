//! # NQ Service
//!
//! Binary entry point for the notification pipeline.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging and the span recorder
//! - Connects the notification store, reads the encryption key and opens the
//!   broker sessions
//! - Serves `/healthz` and `/metrics` while the consumer runs
//!
//! Exit codes: 0 on graceful shutdown, 2 server failure, 3 configuration
//! error, 4 store unreachable, 5 broker unreachable, 6 key unavailable.

use anyhow::Context;
use clap::Parser;
use nq_broker::AmqpTransport;
use nq_core::adapter::{Credentials, HttpUpstreamClient, UpstreamClient};
use nq_core::secrets::{EnvSecretStore, SecretStore, StandardSecrets};
use nq_core::store::{PostgresNotificationStore, PostgresStoreConfig};
use nq_service::{
    init_tracing, Dependencies, Service, ServiceConfig, ServiceError, TracingRecorder,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "nq-service", version, about = "Notification ingestion and fan-out pipeline")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, env = "NQ_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            let code = e
                .downcast_ref::<ServiceError>()
                .map(ServiceError::exit_code)
                .unwrap_or(1);
            error!(error = format!("{:#}", e), exit_code = code, "Service failed");
            eprintln!("nq-service: {:#}", e);
            code
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServiceConfig::load(cli.config.as_deref()).map_err(ServiceError::from)?;

    init_tracing(&config.telemetry).map_err(|message| ServiceError::Telemetry { message })?;

    if cli.check_config {
        config.validate().map_err(ServiceError::from)?;
        info!("Configuration is valid");
        return Ok(());
    }

    info!(
        app_name = %config.telemetry.app_name,
        deployed_env = %config.telemetry.deployed_env,
        "Starting nq-service"
    );

    config.validate().map_err(ServiceError::from)?;

    // -------------------------------------------------------------------------
    // Infrastructure
    // -------------------------------------------------------------------------
    let store = PostgresNotificationStore::connect(
        PostgresStoreConfig::new(config.database.url.clone())
            .with_max_open(config.database.max_open_connections),
    )
    .await
    .map_err(ServiceError::from)?;
    store.ensure_schema().await.map_err(ServiceError::from)?;
    info!("Notification store connected");

    let secrets: Arc<dyn SecretStore> = match &config.encryption.secret_prefix {
        Some(prefix) => Arc::new(EnvSecretStore::with_prefix(prefix.clone())),
        None => Arc::new(EnvSecretStore::new()),
    };

    let upstream = if config.adapter.enabled {
        Some(upstream_client(&config, secrets.as_ref()).await?)
    } else {
        None
    };

    let deps = Dependencies {
        transport: Arc::new(
            AmqpTransport::new().with_connection_name(config.telemetry.app_name.clone()),
        ),
        store: Arc::new(store),
        secrets,
        recorder: Arc::new(TracingRecorder::new(&config.telemetry)),
        upstream,
    };

    let service = Service::build(config.clone(), deps).await?;

    // -------------------------------------------------------------------------
    // HTTP server
    // -------------------------------------------------------------------------
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;
    info!(address = %address, "Serving /healthz and /metrics");

    let (stop, shutdown) = watch::channel(false);
    let server = {
        let router = service.router();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stopped| *stopped).await;
                })
                .await
        })
    };

    let mut pipeline = tokio::spawn(service.run(shutdown));

    // -------------------------------------------------------------------------
    // Run until a signal arrives or the pipeline stops on its own
    // -------------------------------------------------------------------------
    let early = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut pipeline => Some(result),
    };
    let _ = stop.send(true);

    let pipeline_result = match early {
        Some(result) => result,
        None => {
            info!(
                timeout_secs = config.shutdown_timeout().as_secs(),
                "Shutdown requested, draining"
            );
            match tokio::time::timeout(config.shutdown_timeout(), pipeline).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Pipeline did not stop within the shutdown timeout");
                    Ok(Ok(()))
                }
            }
        }
    };

    pipeline_result.context("pipeline task panicked")??;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(ServiceError::ServerFailed {
                message: e.to_string(),
            }
            .into())
        }
        Err(e) => {
            return Err(ServiceError::ServerFailed {
                message: e.to_string(),
            }
            .into())
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Upstream client with basic auth from the adapter password secret
async fn upstream_client(
    config: &ServiceConfig,
    secrets: &dyn SecretStore,
) -> Result<Arc<dyn UpstreamClient>, ServiceError> {
    let credentials = match config.adapter.username.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => {
            let password = secrets
                .get_secret(&StandardSecrets::adapter_password())
                .await?;
            Some(Credentials::new(username, password))
        }
        None => None,
    };
    Ok(Arc::new(HttpUpstreamClient::new(
        credentials,
        config.adapter.fetch_timeout(),
    )?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
