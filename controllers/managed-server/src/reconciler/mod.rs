//! Reconciliation logic for ManagedServer resources.
//!
//! One pass walks `Fetching → Building → ConvergingWorkload → ConvergingEndpoint →
//! Projecting → Done`. Every pass re-reads the parent and its children from the
//! store, so repeating a pass on a converged parent issues no writes.
//!
//! - `builder`: desired Deployment and Service for a spec
//! - `convergence`: fetch/plan/apply of one child with conflict retries
//! - `workload`, `endpoint`: per-kind comparison and in-place update
//! - `ownership`: owner references and adoption checks
//! - `quantity`: value comparison of resource quantities
//! - `status`: phase, conditions and status projection

pub mod builder;
pub mod convergence;
pub mod endpoint;
pub mod ownership;
pub mod quantity;
pub mod status;
pub mod workload;


use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use builder::{build, BuildOptions};
use chrono::Utc;
use cluster_store::ClusterStore;
use convergence::{converge_child, ChildResource, Converged};
use crds::{ManagedServer, ServerPhase};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use ownership::owner_reference;
use status::{project, project_failure, PhasePolicy};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Step of a reconcile pass, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Building,
    ConvergingWorkload,
    ConvergingEndpoint,
    Projecting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a successful pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Parent no longer exists; nothing to do
    Absent,
    /// Parent is being deleted; children are left to garbage collection
    Deleting,
    /// Children converged and status projected
    Done {
        phase: ServerPhase,
        status_written: bool,
    },
}

/// Reconciles ManagedServer resources against a [`ClusterStore`].
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    metrics: Metrics,
    options: BuildOptions,
    phase_policy: PhasePolicy,
    max_conflict_retries: u32,
    /// Namespaces whose inventory gauges have been computed at least once
    inventoried: Mutex<HashSet<String>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .field("phase_policy", &self.phase_policy)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler using the settings in `config`.
    pub fn new(store: Arc<dyn ClusterStore>, metrics: Metrics, config: &ControllerConfig) -> Self {
        Self {
            store,
            metrics,
            options: BuildOptions {
                container_name: config.container_name.clone(),
                secret_env_key: config.secret_env_key.clone(),
            },
            phase_policy: PhasePolicy {
                ready_percent: config.running_ready_percent,
            },
            max_conflict_retries: config.max_conflict_retries,
            inventoried: Mutex::new(HashSet::new()),
        }
    }

    /// Runs one pass for `namespace/name`.
    ///
    /// The namespace inventory gauges are recomputed when the pass could have
    /// changed them, or when they have never been computed.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let _timer = self.metrics.start_reconcile_timer(namespace);
        let result = self.reconcile_server(namespace, name).await;

        let quiet = matches!(
            result,
            Ok(ReconcileOutcome::Deleting | ReconcileOutcome::Done { status_written: false, .. })
        );
        if !quiet || !self.is_inventoried(namespace) {
            self.refresh_inventory(namespace).await;
        }
        result
    }

    async fn reconcile_server(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        debug!(stage = %Stage::Fetching, %namespace, %name, "Reconciling ManagedServer");
        let Some(parent) = self.store.get_server(namespace, name).await? else {
            info!(%namespace, %name, "ManagedServer not found, children are left to garbage collection");
            return Ok(ReconcileOutcome::Absent);
        };
        if parent.metadata.deletion_timestamp.is_some() {
            debug!(%namespace, %name, "ManagedServer is being deleted, leaving children to garbage collection");
            return Ok(ReconcileOutcome::Deleting);
        }

        match self.converge(namespace, name, &parent).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(%namespace, %name, reason = err.reason(), error = %err, "Reconciliation failed");
                if let Some(kind) = err.child_kind() {
                    self.metrics.record_child_error(namespace, name, kind);
                }
                self.record_failure(namespace, name, &parent, &err).await;
                Err(err)
            }
        }
    }

    async fn converge_kind<K: ChildResource>(
        &self,
        desired: &K,
        owner: &OwnerReference,
    ) -> Result<Converged<K>, ControllerError> {
        converge_child(&*self.store, desired, owner, self.max_conflict_retries, &self.options)
            .await
            .map_err(|e| ControllerError::child(K::KIND, e))
    }

    async fn converge(
        &self,
        namespace: &str,
        name: &str,
        parent: &ManagedServer,
    ) -> Result<ReconcileOutcome, ControllerError> {
        if parent.namespace().as_deref() != Some(namespace) || parent.metadata.name.as_deref() != Some(name) {
            return Err(ControllerError::Validation(format!(
                "ManagedServer {namespace}/{name} returned with mismatched identity"
            )));
        }

        debug!(stage = %Stage::Building, %namespace, %name);
        let owner = owner_reference(parent)?;
        let desired = build(name, namespace, &parent.spec, &self.options);

        debug!(stage = %Stage::ConvergingWorkload, %namespace, %name);
        let workload: Converged<Deployment> = self.converge_kind(&desired.workload, &owner).await?;

        debug!(stage = %Stage::ConvergingEndpoint, %namespace, %name);
        let _endpoint: Converged<Service> = self.converge_kind(&desired.endpoint, &owner).await?;

        debug!(stage = %Stage::Projecting, %namespace, %name);
        let observed = match &workload {
            Converged::Created(_) => None,
            Converged::Updated(deployment) | Converged::Unchanged(deployment) => Some(deployment),
        };
        let status = project(parent, observed, self.phase_policy, Utc::now());
        let phase = status.phase.unwrap_or(ServerPhase::Unknown);

        let status_written = parent.status.as_ref() != Some(&status);
        if status_written {
            self.store
                .patch_server_status(namespace, name, &status)
                .await
                .map_err(ControllerError::status)?;
            info!(%namespace, %name, %phase, available = status.available_replicas, "Updated status");
        }

        debug!(stage = %Stage::Done, %namespace, %name, %phase);
        Ok(ReconcileOutcome::Done { phase, status_written })
    }

    /// Surfaces `err` on the parent's `Reconciled` condition. Best effort.
    async fn record_failure(&self, namespace: &str, name: &str, parent: &ManagedServer, err: &ControllerError) {
        let status = project_failure(parent, err, Utc::now());
        if parent.status.as_ref() == Some(&status) {
            return;
        }
        if let Err(e) = self.store.patch_server_status(namespace, name, &status).await {
            warn!(%namespace, %name, error = %e, "Failed to record reconciliation failure in status");
        }
    }

    fn is_inventoried(&self, namespace: &str) -> bool {
        self.inventoried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(namespace)
    }

    /// Recomputes the inventory gauges of `namespace` from a fresh listing.
    pub async fn refresh_inventory(&self, namespace: &str) {
        match self.store.list_servers(namespace).await {
            Ok(servers) => {
                self.metrics.set_inventory(namespace, &servers);
                self.inventoried
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(namespace.to_string());
            }
            Err(e) => warn!(%namespace, error = %e, "Failed to refresh ManagedServer inventory metrics"),
        }
    }
}
