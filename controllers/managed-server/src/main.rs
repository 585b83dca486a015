//! ManagedServer Controller
//!
//! Converges each `ManagedServer` custom resource into a Deployment running the
//! server image and a ClusterIP Service in front of it, and projects the
//! Deployment's readiness back onto the resource status.

mod backoff;
mod config;
mod controller;
mod error;
mod http;
mod metrics;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Another provider may already be installed; either way one is in place
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ManagedServer Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Container: {} (secret key {})", config.container_name, config.secret_env_key);
    info!(
        "  Reconcile: concurrency {}, timeout {}s, {} conflict attempts",
        config.concurrency,
        config.reconcile_timeout.as_secs(),
        config.max_conflict_retries
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
