//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster store,
//! metrics, reconciler, watcher and HTTP endpoints together and runs them.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::http::{self, HttpState};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::watcher::{self, Context};
use cluster_store::{ClusterStore, KubeStore};
use crds::ManagedServer;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use prometheus::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for ManagedServer resources.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    http: JoinHandle<Result<(), ControllerError>>,
}

fn apis(client: &Client, namespace: Option<&str>) -> (Api<ManagedServer>, Api<Deployment>, Api<Service>) {
    match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client.clone())),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing ManagedServer Controller");

        let client = Client::try_default().await?;

        let registry = Registry::new();
        let metrics = Metrics::register(&registry)?;

        let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client.clone()));
        let reconciler = Reconciler::new(store, metrics, &config);
        let context = Arc::new(Context::new(reconciler, &config));

        let ready = Arc::new(AtomicBool::new(false));
        let http = tokio::spawn(http::serve(config.metrics_addr, HttpState::new(registry, Arc::clone(&ready))));

        let (servers, deployments, services) = apis(&client, config.namespace.as_deref());
        let concurrency = config.concurrency;
        let watcher = tokio::spawn(async move {
            watcher::watch_servers(servers, deployments, services, context, concurrency).await
        });
        ready.store(true, Ordering::Release);

        Ok(Self { watcher, http })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ManagedServer Controller running");

        // Whichever task exits first ends the process
        let result = tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ManagedServer watcher panicked: {e}")))?
            }
            result = &mut self.http => {
                result.map_err(|e| ControllerError::Watch(format!("HTTP server panicked: {e}")))?
            }
        };
        self.watcher.abort();
        self.http.abort();

        info!("ManagedServer Controller stopped");
        result
    }
}
