//! Kubernetes-backed [`ClusterStore`].

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use crds::{ManagedServer, ManagedServerStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Field manager recorded on every write
const FIELD_MANAGER: &str = "managed-server-controller";

/// [`ClusterStore`] over the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Wraps an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        self.api::<K>(namespace).get_opt(name).await.map_err(StoreError::from_kube)
    }

    async fn create<K>(&self, obj: &K) -> Result<K, StoreError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let namespace = namespace_of(obj)?;
        debug!(kind = %K::kind(&()), namespace = %namespace, name = %obj.name_any(), "Creating object");
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PostParams::default() };
        self.api::<K>(&namespace).create(&pp, obj).await.map_err(StoreError::from_kube)
    }

    async fn replace<K>(&self, obj: &K) -> Result<K, StoreError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let namespace = namespace_of(obj)?;
        let name = obj.meta().name.clone()
            .ok_or_else(|| StoreError::InvalidObject(format!("{} without a name", K::kind(&()))))?;
        debug!(kind = %K::kind(&()), namespace = %namespace, name = %name, "Replacing object");
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PostParams::default() };
        self.api::<K>(&namespace).replace(&name, &pp, obj).await.map_err(StoreError::from_kube)
    }
}

fn namespace_of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<String, StoreError> {
    obj.meta().namespace.clone().ok_or_else(|| {
        StoreError::InvalidObject(format!("{} {} without a namespace", K::kind(&()), obj.name_any()))
    })
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_server(&self, namespace: &str, name: &str) -> Result<Option<ManagedServer>, StoreError> {
        self.get(namespace, name).await
    }

    async fn list_servers(&self, namespace: &str) -> Result<Vec<ManagedServer>, StoreError> {
        let list = self.api::<ManagedServer>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(StoreError::from_kube)?;
        Ok(list.items)
    }

    async fn patch_server_status(&self, namespace: &str, name: &str, status: &ManagedServerStatus) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        let pp = PatchParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PatchParams::default() };
        self.api::<ManagedServer>(namespace)
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
            .map_err(StoreError::from_kube)?;
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError> {
        self.get(namespace, name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        self.create(deployment).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        self.replace(deployment).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError> {
        self.get(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        self.create(service).await
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, StoreError> {
        self.replace(service).await
    }
}
