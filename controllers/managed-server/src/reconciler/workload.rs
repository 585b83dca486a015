//! Deployment as a converged child.
//!
//! Only the fields the builder derives are compared: replicas, pod template
//! labels, and on the server container (matched by name) the image, the `http`
//! port, the credential env var and the resources. Defaults filled in by the API
//! server and additions by other actors are left alone.

use super::builder::{BuildOptions, HTTP_PORT_NAME};
use super::convergence::ChildResource;
use super::quantity::same_quantities;
use crate::error::ChildKind;
use cluster_store::{ClusterStore, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

fn containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(|pod| pod.containers.as_slice())
        .unwrap_or_default()
}

fn find_container<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a Container> {
    containers(deployment).iter().find(|c| c.name == name)
}

fn http_port(container: &Container) -> Option<&ContainerPort> {
    container
        .ports
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME))
}

fn env_var<'a>(container: &'a Container, name: &str) -> Option<&'a EnvVar> {
    container.env.as_deref().unwrap_or_default().iter().find(|e| e.name == name)
}

type Quantities = BTreeMap<String, Quantity>;

fn requests_and_limits(resources: Option<&ResourceRequirements>) -> (Quantities, Quantities) {
    let resources = resources.cloned().unwrap_or_default();
    (resources.requests.unwrap_or_default(), resources.limits.unwrap_or_default())
}

fn template_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.as_ref())
}

fn container_drifted(current: &Container, desired: &Container, options: &BuildOptions) -> bool {
    if current.image != desired.image {
        return true;
    }
    if http_port(current).map(|p| p.container_port) != http_port(desired).map(|p| p.container_port) {
        return true;
    }
    let key = options.secret_env_key.as_str();
    let current_env = env_var(current, key).map(|e| (&e.value, &e.value_from));
    let desired_env = env_var(desired, key).map(|e| (&e.value, &e.value_from));
    if current_env != desired_env {
        return true;
    }
    let (current_requests, current_limits) = requests_and_limits(current.resources.as_ref());
    let (desired_requests, desired_limits) = requests_and_limits(desired.resources.as_ref());
    !(same_quantities(&current_requests, &desired_requests) && same_quantities(&current_limits, &desired_limits))
}

fn converge_container(current: &mut Container, desired: &Container, options: &BuildOptions) {
    current.image.clone_from(&desired.image);

    if let Some(port) = http_port(desired) {
        let ports = current.ports.get_or_insert_with(Vec::new);
        match ports.iter_mut().find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME)) {
            Some(existing) => existing.container_port = port.container_port,
            None => ports.push(port.clone()),
        }
    }

    let key = options.secret_env_key.as_str();
    let env = current.env.get_or_insert_with(Vec::new);
    match (env.iter().position(|e| e.name == key), env_var(desired, key)) {
        (Some(index), Some(wanted)) => env[index] = wanted.clone(),
        (Some(index), None) => {
            env.remove(index);
        }
        (None, Some(wanted)) => env.push(wanted.clone()),
        (None, None) => {}
    }
    if env.is_empty() {
        current.env = None;
    }

    current.resources.clone_from(&desired.resources);
}

#[async_trait::async_trait]
impl ChildResource for Deployment {
    const KIND: ChildKind = ChildKind::Workload;

    async fn fetch(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<Option<Self>, StoreError> {
        store.get_deployment(namespace, name).await
    }

    async fn create(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError> {
        store.create_deployment(obj).await
    }

    async fn replace(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError> {
        store.replace_deployment(obj).await
    }

    fn drifted(&self, desired: &Self, options: &BuildOptions) -> bool {
        let replicas = |d: &Deployment| d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        if replicas(self) != replicas(desired) {
            return true;
        }

        let current_labels = template_labels(self);
        let labels_missing = template_labels(desired)
            .into_iter()
            .flatten()
            .any(|(k, v)| current_labels.and_then(|labels| labels.get(k)) != Some(v));
        if labels_missing {
            return true;
        }

        match find_container(desired, &options.container_name) {
            Some(wanted) => find_container(self, &options.container_name)
                .is_none_or(|current| container_drifted(current, wanted, options)),
            None => false,
        }
    }

    fn converge(&mut self, desired: &Self, options: &BuildOptions) {
        let Some(desired_spec) = desired.spec.as_ref() else {
            return;
        };
        let spec = self.spec.get_or_insert_with(|| desired_spec.clone());
        spec.replicas = desired_spec.replicas;

        if let Some(wanted) = desired_spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref()) {
            spec.template
                .metadata
                .get_or_insert_with(Default::default)
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(wanted.clone());
        }

        let Some(wanted) = find_container(desired, &options.container_name) else {
            return;
        };
        let pod = spec.template.spec.get_or_insert_with(Default::default);
        match pod.containers.iter_mut().find(|c| c.name == wanted.name) {
            Some(current) => converge_container(current, wanted, options),
            None => pod.containers.push(wanted.clone()),
        }
    }
}
