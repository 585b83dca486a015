//! Desired-state builder.
//!
//! Turns a ManagedServer spec into the Deployment and Service that should exist
//! for it. Pure: no I/O, no validation, same input gives the same objects.

use crds::{ManagedServerSpec, ServerResources};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, ResourceRequirements, SecretKeySelector,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Label recognising children created by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGER: &str = "managed-server-controller";
/// Name of the container and service port carrying server traffic
pub const HTTP_PORT_NAME: &str = "http";
/// Only Service type the controller manages
pub const SERVICE_TYPE: &str = "ClusterIP";

/// Knobs that shape the built objects but are not part of the spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub container_name: String,
    /// Env var name, and key within the secret, for the credential
    pub secret_env_key: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            container_name: "mcp-server".to_string(),
            secret_env_key: "API_KEY".to_string(),
        }
    }
}

/// Children a ManagedServer should have
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub workload: Deployment,
    pub endpoint: Service,
}

/// Selector shared by the Deployment, its pod template and the Service.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn object_meta(name: &str, namespace: &str) -> ObjectMeta {
    let mut labels = selector_labels(name);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        return None;
    }
    Some(map.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect())
}

fn resource_requirements(resources: &ServerResources) -> ResourceRequirements {
    ResourceRequirements {
        requests: quantities(&resources.requests),
        limits: quantities(&resources.limits),
        ..Default::default()
    }
}

/// Env entry pulling the credential out of `secret`.
pub fn secret_env(secret: &str, options: &BuildOptions) -> EnvVar {
    EnvVar {
        name: options.secret_env_key.clone(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: options.secret_env_key.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container(spec: &ManagedServerSpec, options: &BuildOptions) -> Container {
    Container {
        name: options.container_name.clone(),
        image: Some(spec.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(HTTP_PORT_NAME.to_string()),
            container_port: spec.port,
            ..Default::default()
        }]),
        env: spec.secret().map(|secret| vec![secret_env(secret, options)]),
        resources: spec.resources.as_ref().map(resource_requirements),
        ..Default::default()
    }
}

fn workload(name: &str, namespace: &str, spec: &ManagedServerSpec, options: &BuildOptions) -> Deployment {
    Deployment {
        metadata: object_meta(name, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container(spec, options)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn endpoint(name: &str, namespace: &str, spec: &ManagedServerSpec) -> Service {
    Service {
        metadata: object_meta(name, namespace),
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE.to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port: spec.port,
                target_port: Some(IntOrString::Int(spec.port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Builds both children for the ManagedServer `namespace/name`.
pub fn build(name: &str, namespace: &str, spec: &ManagedServerSpec, options: &BuildOptions) -> DesiredState {
    DesiredState {
        workload: workload(name, namespace, spec, options),
        endpoint: endpoint(name, namespace, spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_container(deployment: &Deployment) -> &Container {
        &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn test_workload_matches_spec() {
        let mut spec = ManagedServerSpec::new("test-image:v1");
        spec.replicas = 2;
        let desired = build("weather", "default", &spec, &BuildOptions::default());

        let deployment = &desired.workload;
        assert_eq!(deployment.metadata.name.as_deref(), Some("weather"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));
        let deployment_spec = deployment.spec.as_ref().unwrap();
        assert_eq!(deployment_spec.replicas, Some(2));
        assert_eq!(deployment_spec.selector.match_labels, Some(selector_labels("weather")));
        assert_eq!(
            deployment_spec.template.metadata.as_ref().unwrap().labels,
            Some(selector_labels("weather"))
        );

        let container = server_container(deployment);
        assert_eq!(container.name, "mcp-server");
        assert_eq!(container.image.as_deref(), Some("test-image:v1"));
        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("http"));
        assert_eq!(port.container_port, 8080);
        assert!(container.env.is_none());
        assert!(container.resources.is_none());
    }

    #[test]
    fn test_endpoint_matches_spec() {
        let mut spec = ManagedServerSpec::new("a:v1");
        spec.port = 9090;
        let desired = build("web", "apps", &spec, &BuildOptions::default());

        let service_spec = desired.endpoint.spec.as_ref().unwrap();
        assert_eq!(service_spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(service_spec.selector, Some(selector_labels("web")));
        let port = &service_spec.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("http"));
        assert_eq!(port.port, 9090);
        assert_eq!(port.target_port, Some(IntOrString::Int(9090)));
    }

    #[test]
    fn test_children_carry_managed_by_label() {
        let desired = build("web", "apps", &ManagedServerSpec::new("a:v1"), &BuildOptions::default());
        for labels in [&desired.workload.metadata.labels, &desired.endpoint.metadata.labels] {
            let labels = labels.as_ref().unwrap();
            assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGER));
            assert_eq!(labels.get("app").map(String::as_str), Some("web"));
        }
    }

    #[test]
    fn test_secret_injected_under_configured_key() {
        let mut spec = ManagedServerSpec::new("a:v1");
        spec.secret_name = Some("weather-creds".to_string());
        let options = BuildOptions {
            secret_env_key: "OPENWEATHER_API_KEY".to_string(),
            ..Default::default()
        };
        let desired = build("web", "apps", &spec, &options);

        let env = server_container(&desired.workload).env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "OPENWEATHER_API_KEY");
        assert!(env[0].value.is_none());
        let secret_ref = env[0].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(secret_ref.name, "weather-creds");
        assert_eq!(secret_ref.key, "OPENWEATHER_API_KEY");
    }

    #[test]
    fn test_empty_secret_name_adds_no_env() {
        let mut spec = ManagedServerSpec::new("a:v1");
        spec.secret_name = Some(String::new());
        let desired = build("web", "apps", &spec, &BuildOptions::default());
        assert!(server_container(&desired.workload).env.is_none());
    }

    #[test]
    fn test_resources_copied_verbatim() {
        let mut spec = ManagedServerSpec::new("a:v1");
        spec.resources = Some(ServerResources {
            requests: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
            limits: BTreeMap::from([("memory".to_string(), "128Mi".to_string())]),
        });
        let desired = build("web", "apps", &spec, &BuildOptions::default());

        let resources = server_container(&desired.workload).resources.as_ref().unwrap();
        assert_eq!(resources.requests.as_ref().unwrap()["cpu"], Quantity("100m".to_string()));
        assert_eq!(resources.limits.as_ref().unwrap()["memory"], Quantity("128Mi".to_string()));
    }

    #[test]
    fn test_build_is_deterministic() {
        let spec = ManagedServerSpec::new("a:v1");
        let options = BuildOptions::default();
        assert_eq!(build("web", "apps", &spec, &options), build("web", "apps", &spec, &options));
    }
}
