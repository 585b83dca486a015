//! Mock ClusterStore for unit testing
//!
//! Stores objects in memory and mimics the API server behaviours the reconciler
//! depends on: resource versions with optimistic concurrency on replace, uid
//! assignment on create, status preserved across spec replaces, and owner-reference
//! cascade deletion. Every write call is logged so tests can assert on exactly
//! which writes a reconciliation issued. Faults can be queued per operation.

use crate::error::StoreError;
use crate::store_trait::ClusterStore;
use crds::{ManagedServer, ManagedServerSpec, ManagedServerStatus};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A write issued against the mock, keyed by `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateDeployment(String),
    ReplaceDeployment(String),
    CreateService(String),
    ReplaceService(String),
    PatchServerStatus(String),
}

/// Operations a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    GetServer,
    PatchServerStatus,
    GetDeployment,
    CreateDeployment,
    ReplaceDeployment,
    GetService,
    CreateService,
    ReplaceService,
}

/// Injected failure, consumed by the next matching operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Replace: another writer bumps the stored version first, the call fails with Conflict
    Conflict,
    /// Any operation fails with Unavailable
    Unavailable,
    /// Create: another creator stores the same object first, the call fails with AlreadyExists
    ConcurrentCreate,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    servers: HashMap<Key, ManagedServer>,
    deployments: HashMap<Key, Deployment>,
    services: HashMap<Key, Service>,
    calls: Vec<MockCall>,
    faults: Vec<(MockOp, Fault)>,
    lists: usize,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_fault(&mut self, op: MockOp) -> Option<Fault> {
        let index = self.faults.iter().position(|(o, _)| *o == op)?;
        Some(self.faults.remove(index).1)
    }
}

/// In-memory [`ClusterStore`]
#[derive(Clone, Default)]
pub struct MockClusterStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterStore").finish_non_exhaustive()
    }
}

fn key_of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Key, StoreError> {
    match (&obj.meta().namespace, &obj.meta().name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(StoreError::InvalidObject(format!("{} without namespace/name", K::kind(&())))),
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn label((namespace, name): &Key) -> String {
    format!("{namespace}/{name}")
}

fn create_in<K>(map: &mut HashMap<Key, K>, obj: &K, version: String) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + Clone,
{
    let key = key_of(obj)?;
    if map.contains_key(&key) {
        return Err(StoreError::AlreadyExists(label(&key)));
    }
    let mut stored = obj.clone();
    let meta = stored.meta_mut();
    meta.uid = Some(uuid::Uuid::new_v4().to_string());
    meta.resource_version = Some(version);
    meta.generation = Some(1);
    map.insert(key, stored.clone());
    Ok(stored)
}

fn replace_in<K>(
    map: &mut HashMap<Key, K>,
    obj: &K,
    version: String,
    keep_status: impl FnOnce(&K, &mut K),
) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + Clone,
{
    let key = key_of(obj)?;
    let existing = map.get(&key).ok_or_else(|| StoreError::NotFound(label(&key)))?;
    if obj.meta().resource_version != existing.meta().resource_version {
        return Err(StoreError::Conflict(format!(
            "{}: resourceVersion {:?} is stale",
            label(&key),
            obj.meta().resource_version
        )));
    }
    let mut stored = obj.clone();
    keep_status(existing, &mut stored);
    let meta = stored.meta_mut();
    meta.uid = existing.meta().uid.clone();
    meta.generation = existing.meta().generation;
    meta.resource_version = Some(version);
    map.insert(key, stored.clone());
    Ok(stored)
}

impl MockClusterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a fault for the next call of `op`
    pub fn inject_fault(&self, op: MockOp, fault: Fault) {
        self.lock().faults.push((op, fault));
    }

    /// Writes issued so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Forget the write log
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of `list_servers` calls served so far
    pub fn list_count(&self) -> usize {
        self.lock().lists
    }

    /// Add a parent (for test setup). Assigns uid, generation and resourceVersion.
    pub fn insert_server(&self, mut server: ManagedServer) -> ManagedServer {
        let mut state = self.lock();
        let version = state.next_version();
        let meta = server.meta_mut();
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        meta.generation.get_or_insert(1);
        meta.resource_version = Some(version);
        let key = key(&server.namespace().unwrap_or_default(), &server.name_any());
        state.servers.insert(key, server.clone());
        server
    }

    /// Edit a parent's spec the way an external actor would; bumps the generation
    pub fn update_server_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut ManagedServerSpec)) {
        let mut state = self.lock();
        let version = state.next_version();
        if let Some(server) = state.servers.get_mut(&key(namespace, name)) {
            edit(&mut server.spec);
            let meta = server.meta_mut();
            meta.generation = Some(meta.generation.unwrap_or(0) + 1);
            meta.resource_version = Some(version);
        }
    }

    /// Delete a parent and cascade to every child owned by its uid
    pub fn delete_server(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let Some(server) = state.servers.remove(&key(namespace, name)) else {
            return;
        };
        let Some(uid) = server.uid() else {
            return;
        };
        let owned_by = |refs: &[k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference]| {
            refs.iter().any(|r| r.uid == uid)
        };
        state.deployments.retain(|_, d| !owned_by(d.owner_references()));
        state.services.retain(|_, s| !owned_by(s.owner_references()));
    }

    pub fn server(&self, namespace: &str, name: &str) -> Option<ManagedServer> {
        self.lock().servers.get(&key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&key(namespace, name)).cloned()
    }

    /// Store a Deployment directly, bypassing the write log (for test setup)
    pub fn insert_deployment(&self, mut deployment: Deployment) {
        let mut state = self.lock();
        let version = state.next_version();
        deployment.meta_mut().resource_version = Some(version);
        deployment.meta_mut().uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        if let Ok(key) = key_of(&deployment) {
            state.deployments.insert(key, deployment);
        }
    }

    /// Store a Service directly, bypassing the write log (for test setup)
    pub fn insert_service(&self, mut service: Service) {
        let mut state = self.lock();
        let version = state.next_version();
        service.meta_mut().resource_version = Some(version);
        service.meta_mut().uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        if let Ok(key) = key_of(&service) {
            state.services.insert(key, service);
        }
    }

    /// Mutate a stored Deployment out of band; bumps its resourceVersion
    pub fn edit_deployment(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut Deployment)) {
        let mut state = self.lock();
        let version = state.next_version();
        if let Some(deployment) = state.deployments.get_mut(&key(namespace, name)) {
            edit(deployment);
            deployment.meta_mut().resource_version = Some(version);
        }
    }

    /// Simulate the Deployment controller reporting ready pods
    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: i32) {
        self.edit_deployment(namespace, name, |deployment| {
            let status = deployment.status.get_or_insert_with(DeploymentStatus::default);
            status.ready_replicas = Some(ready);
            status.available_replicas = Some(ready);
        });
    }

    pub fn delete_deployment(&self, namespace: &str, name: &str) {
        self.lock().deployments.remove(&key(namespace, name));
    }

    pub fn delete_service(&self, namespace: &str, name: &str) {
        self.lock().services.remove(&key(namespace, name));
    }
}

fn unavailable(op: MockOp) -> StoreError {
    StoreError::Unavailable(format!("injected fault on {op:?}"))
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_server(&self, namespace: &str, name: &str) -> Result<Option<ManagedServer>, StoreError> {
        let mut state = self.lock();
        if state.take_fault(MockOp::GetServer).is_some() {
            return Err(unavailable(MockOp::GetServer));
        }
        Ok(state.servers.get(&key(namespace, name)).cloned())
    }

    async fn list_servers(&self, namespace: &str) -> Result<Vec<ManagedServer>, StoreError> {
        let mut state = self.lock();
        state.lists += 1;
        let mut servers: Vec<ManagedServer> = state.servers.iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, server)| server.clone())
            .collect();
        servers.sort_by_key(|server| server.name_any());
        Ok(servers)
    }

    async fn patch_server_status(&self, namespace: &str, name: &str, status: &ManagedServerStatus) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = key(namespace, name);
        state.calls.push(MockCall::PatchServerStatus(label(&key)));
        if state.take_fault(MockOp::PatchServerStatus).is_some() {
            return Err(unavailable(MockOp::PatchServerStatus));
        }
        let version = state.next_version();
        let server = state.servers.get_mut(&key).ok_or_else(|| StoreError::NotFound(label(&key)))?;
        server.status = Some(status.clone());
        server.meta_mut().resource_version = Some(version);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, StoreError> {
        let mut state = self.lock();
        if state.take_fault(MockOp::GetDeployment).is_some() {
            return Err(unavailable(MockOp::GetDeployment));
        }
        Ok(state.deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut state = self.lock();
        let key = key_of(deployment)?;
        state.calls.push(MockCall::CreateDeployment(label(&key)));
        match state.take_fault(MockOp::CreateDeployment) {
            Some(Fault::ConcurrentCreate) => {
                let version = state.next_version();
                create_in(&mut state.deployments, deployment, version)?;
                Err(StoreError::AlreadyExists(label(&key)))
            }
            Some(_) => Err(unavailable(MockOp::CreateDeployment)),
            None => {
                let version = state.next_version();
                create_in(&mut state.deployments, deployment, version)
            }
        }
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut state = self.lock();
        let key = key_of(deployment)?;
        state.calls.push(MockCall::ReplaceDeployment(label(&key)));
        match state.take_fault(MockOp::ReplaceDeployment) {
            Some(Fault::Conflict) => {
                let version = state.next_version();
                if let Some(existing) = state.deployments.get_mut(&key) {
                    existing.meta_mut().resource_version = Some(version);
                }
                Err(StoreError::Conflict(label(&key)))
            }
            Some(_) => Err(unavailable(MockOp::ReplaceDeployment)),
            None => {
                let version = state.next_version();
                replace_in(&mut state.deployments, deployment, version, |old, new| {
                    new.status.clone_from(&old.status);
                })
            }
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError> {
        let mut state = self.lock();
        if state.take_fault(MockOp::GetService).is_some() {
            return Err(unavailable(MockOp::GetService));
        }
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        let mut state = self.lock();
        let key = key_of(service)?;
        state.calls.push(MockCall::CreateService(label(&key)));
        match state.take_fault(MockOp::CreateService) {
            Some(Fault::ConcurrentCreate) => {
                let version = state.next_version();
                create_in(&mut state.services, service, version)?;
                Err(StoreError::AlreadyExists(label(&key)))
            }
            Some(_) => Err(unavailable(MockOp::CreateService)),
            None => {
                let version = state.next_version();
                create_in(&mut state.services, service, version)
            }
        }
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, StoreError> {
        let mut state = self.lock();
        let key = key_of(service)?;
        state.calls.push(MockCall::ReplaceService(label(&key)));
        match state.take_fault(MockOp::ReplaceService) {
            Some(Fault::Conflict) => {
                let version = state.next_version();
                if let Some(existing) = state.services.get_mut(&key) {
                    existing.meta_mut().resource_version = Some(version);
                }
                Err(StoreError::Conflict(label(&key)))
            }
            Some(_) => Err(unavailable(MockOp::ReplaceService)),
            None => {
                let version = state.next_version();
                replace_in(&mut state.services, service, version, |old, new| {
                    new.status.clone_from(&old.status);
                })
            }
        }
    }
}
