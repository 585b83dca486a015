//! Kubernetes resource watchers.
//!
//! Drives reconciliation with `kube_runtime::Controller`: ManagedServer changes
//! trigger a pass directly, Deployment and Service changes trigger a pass for their
//! owning ManagedServer. The runtime serialises passes per object and bounds the
//! number running in parallel.

use crate::backoff::{BackoffTracker, ExponentialBackoff};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::builder::{MANAGED_BY_LABEL, MANAGER};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::ManagedServer;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as RuntimeConfig, Error as RuntimeError},
    watcher, Controller,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconcile and error-policy call.
#[derive(Debug)]
pub struct Context {
    reconciler: Reconciler,
    backoff: BackoffTracker,
    timeout: Duration,
}

impl Context {
    pub fn new(reconciler: Reconciler, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            backoff: BackoffTracker::new(ExponentialBackoff::new(config.backoff_base, config.backoff_max)),
            timeout: config.reconcile_timeout,
        }
    }
}

fn object_key(server: &ManagedServer) -> String {
    format!("{}/{}", server.namespace().unwrap_or_default(), server.name_any())
}

/// One bounded reconcile pass. The trigger payload only names the object; the
/// reconciler re-reads it.
async fn reconcile(server: Arc<ManagedServer>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let name = server.name_any();
    let namespace = server
        .namespace()
        .ok_or_else(|| ControllerError::Validation(format!("ManagedServer {name} has no namespace")))?;

    let outcome = tokio::time::timeout(ctx.timeout, ctx.reconciler.reconcile(&namespace, &name))
        .await
        .map_err(|_elapsed| ControllerError::Timeout(ctx.timeout.as_secs()))??;

    ctx.backoff.reset(&object_key(&server));
    match outcome {
        ReconcileOutcome::Absent => debug!(%namespace, %name, "ManagedServer gone"),
        ReconcileOutcome::Deleting => debug!(%namespace, %name, "ManagedServer deleting"),
        ReconcileOutcome::Done { phase, status_written } => {
            debug!(%namespace, %name, %phase, status_written, "Reconciled ManagedServer");
        }
    }
    Ok(Action::await_change())
}

/// Delay before retrying `key` after `err`.
///
/// Errors that only an edit can clear wait the full backoff cap; the watch
/// triggers a pass as soon as that edit lands.
fn retry_delay(backoff: &BackoffTracker, key: &str, err: &ControllerError) -> Duration {
    let delay = backoff.record_failure(key);
    if err.is_transient() {
        delay
    } else {
        backoff.max_delay()
    }
}

/// Requeues failed passes with per-object exponential backoff.
fn error_policy(server: Arc<ManagedServer>, err: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(&server);
    let delay = retry_delay(&ctx.backoff, &key, err);
    error!(
        object = %key,
        reason = err.reason(),
        error = %err,
        transient = err.is_transient(),
        failures = ctx.backoff.failures(&key),
        retry_in_secs = delay.as_secs(),
        "Reconciliation error"
    );
    Action::requeue(delay)
}

/// Watches ManagedServers and their children until a shutdown signal arrives.
pub async fn watch_servers(
    servers: Api<ManagedServer>,
    deployments: Api<Deployment>,
    services: Api<Service>,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Result<(), ControllerError> {
    info!("Starting ManagedServer watcher");

    let children = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGER}"));
    let runtime_config = RuntimeConfig::default().concurrency(concurrency);

    let inventory = Arc::clone(&ctx);

    Controller::new(servers, watcher::Config::default())
        .owns(deployments, children.clone())
        .owns(services, children)
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            let inventory = Arc::clone(&inventory);
            async move {
                match res {
                    Ok((obj, _action)) => debug!(object = %obj, "Reconcile request handled"),
                    // Deleted parents never reach the reconciler, so their inventory is dropped here
                    Err(RuntimeError::ObjectNotFound(obj)) => {
                        debug!(object = %obj, "ManagedServer deleted");
                        if let Some(namespace) = obj.namespace.as_deref() {
                            inventory.reconciler.refresh_inventory(namespace).await;
                        }
                    }
                    Err(e) => warn!(error = %e, "Controller error"),
                }
            }
        })
        .await;

    info!("ManagedServer watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_store::StoreError;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_transient_errors_back_off_exponentially() {
        let backoff = BackoffTracker::new(ExponentialBackoff::new(secs(5), secs(300)));
        let err = ControllerError::from(StoreError::Unavailable("503".to_string()));

        assert_eq!(retry_delay(&backoff, "default/web", &err), secs(5));
        assert_eq!(retry_delay(&backoff, "default/web", &err), secs(10));
        assert_eq!(backoff.failures("default/web"), 2);
    }

    #[test]
    fn test_permanent_errors_wait_for_an_edit() {
        let backoff = BackoffTracker::new(ExponentialBackoff::new(secs(5), secs(300)));
        let err = ControllerError::OwnershipCollision {
            kind: "Deployment".to_string(),
            name: "web".to_string(),
            owner_uid: "other".to_string(),
        };

        assert_eq!(retry_delay(&backoff, "default/web", &err), secs(300));
        assert_eq!(backoff.failures("default/web"), 1);
    }
}
