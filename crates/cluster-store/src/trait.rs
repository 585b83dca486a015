//! ClusterStore trait for mocking
//!
//! The reconciler only ever talks to the cluster through this trait. `KubeStore`
//! implements it against the API server; `MockClusterStore` implements it in memory.

use crate::error::StoreError;
use crds::{ManagedServer, ManagedServerStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;

/// Read/write capability over the objects the controller manages.
///
/// `get_*` return `Ok(None)` when the object does not exist. `replace_*` carry the
/// object's `resourceVersion` and fail with [`StoreError::Conflict`] when it is stale.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    // Parent
    async fn get_server(&self, namespace: &str, name: &str) -> Result<Option<ManagedServer>, StoreError>;
    async fn list_servers(&self, namespace: &str) -> Result<Vec<ManagedServer>, StoreError>;
    /// Writes through the status subresource only; never touches the spec.
    async fn patch_server_status(&self, namespace: &str, name: &str, status: &ManagedServerStatus) -> Result<(), StoreError>;

    // Workload
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError>;
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;

    // Endpoint
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError>;
    async fn create_service(&self, service: &Service) -> Result<Service, StoreError>;
    async fn replace_service(&self, service: &Service) -> Result<Service, StoreError>;
}
