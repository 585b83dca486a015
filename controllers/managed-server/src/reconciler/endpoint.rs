//! Service as a converged child.
//!
//! Compared fields: selector, type, and port/targetPort of the `http` port.

use super::builder::{BuildOptions, HTTP_PORT_NAME, SERVICE_TYPE};
use super::convergence::ChildResource;
use crate::error::ChildKind;
use cluster_store::{ClusterStore, StoreError};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

fn http_port(spec: &ServiceSpec) -> Option<&ServicePort> {
    spec.ports
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME))
}

/// Port and effective target port; an unset targetPort defaults to the port.
fn port_pair(port: &ServicePort) -> (i32, IntOrString) {
    (
        port.port,
        port.target_port.clone().unwrap_or(IntOrString::Int(port.port)),
    )
}

#[async_trait::async_trait]
impl ChildResource for Service {
    const KIND: ChildKind = ChildKind::Endpoint;

    async fn fetch(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<Option<Self>, StoreError> {
        store.get_service(namespace, name).await
    }

    async fn create(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError> {
        store.create_service(obj).await
    }

    async fn replace(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError> {
        store.replace_service(obj).await
    }

    fn drifted(&self, desired: &Self, _options: &BuildOptions) -> bool {
        let (Some(current), Some(wanted)) = (self.spec.as_ref(), desired.spec.as_ref()) else {
            return desired.spec.is_some();
        };
        current.selector != wanted.selector
            || current.type_.as_deref().unwrap_or(SERVICE_TYPE) != wanted.type_.as_deref().unwrap_or(SERVICE_TYPE)
            || http_port(current).map(port_pair) != http_port(wanted).map(port_pair)
    }

    fn converge(&mut self, desired: &Self, _options: &BuildOptions) {
        let Some(wanted) = desired.spec.as_ref() else {
            return;
        };
        let spec = self.spec.get_or_insert_with(|| wanted.clone());
        spec.selector.clone_from(&wanted.selector);
        spec.type_.clone_from(&wanted.type_);

        if let Some(port) = http_port(wanted) {
            let ports = spec.ports.get_or_insert_with(Vec::new);
            match ports.iter_mut().find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME)) {
                Some(existing) => {
                    existing.port = port.port;
                    existing.target_port.clone_from(&port.target_port);
                }
                None => ports.push(port.clone()),
            }
        }
    }
}
