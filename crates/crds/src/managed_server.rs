//! ManagedServer CRD
//!
//! Declares a server workload (image, replicas, port, secret, resources) that the
//! controller materialises as a Deployment and a ClusterIP Service.

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "mcp.mcp.dev",
    version = "v1alpha1",
    kind = "ManagedServer",
    plural = "managedservers",
    shortname = "msrv",
    namespaced,
    status = "ManagedServerStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServerSpec {
    /// Container image for the server
    pub image: String,

    /// Number of server instances to run
    #[serde(default = "default_replicas")]
    #[schemars(range(min = 1))]
    pub replicas: i32,

    /// HTTP port the server listens on
    #[serde(default = "default_port")]
    pub port: i32,

    /// Name of a Secret supplying the server's runtime credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Compute resources for the server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServerResources>,
}

fn default_replicas() -> i32 {
    1
}

fn default_port() -> i32 {
    8080
}

impl ManagedServerSpec {
    /// Creates a spec with default replicas and port.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            replicas: default_replicas(),
            port: default_port(),
            secret_name: None,
            resources: None,
        }
    }

    /// Secret name, treating an empty string as unset.
    pub fn secret(&self) -> Option<&str> {
        self.secret_name.as_deref().filter(|s| !s.is_empty())
    }
}

/// Resource requests and limits, keyed by resource name (`cpu`, `memory`, ...)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerResources {
    /// Minimum resources required
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    /// Maximum resources allowed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServerStatus {
    /// Number of server pods that are ready
    #[serde(default)]
    pub available_replicas: i32,

    /// Current lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ServerPhase>,

    /// Spec generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions, unique by `type`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ServerCondition>,
}

impl ManagedServerStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&ServerCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Lifecycle phase derived from the workload's ready replicas
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ServerPhase {
    /// Workload not observed yet, or no replica ready
    Pending,

    /// All desired replicas ready
    Running,

    /// Some, but not all, replicas ready
    Degraded,

    /// Replica counts that fit no other phase
    Unknown,
}

impl ServerPhase {
    /// Every phase, in declaration order.
    pub const ALL: [ServerPhase; 4] = [
        ServerPhase::Pending,
        ServerPhase::Running,
        ServerPhase::Degraded,
        ServerPhase::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServerPhase::Pending => "Pending",
            ServerPhase::Running => "Running",
            ServerPhase::Degraded => "Degraded",
            ServerPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status condition, modelled on `metav1.Condition`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCondition {
    /// Condition type (`Available`, `Reconciled`)
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Machine-readable CamelCase reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    /// Last time `status` changed
    pub last_transition_time: chrono::DateTime<chrono::Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_defaults_applied() {
        let spec: ManagedServerSpec =
            serde_json::from_value(serde_json::json!({ "image": "a:v1" })).unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.port, 8080);
        assert!(spec.secret_name.is_none());
        assert!(spec.resources.is_none());
    }

    #[test]
    fn test_empty_secret_name_is_unset() {
        let mut spec = ManagedServerSpec::new("a:v1");
        spec.secret_name = Some(String::new());
        assert_eq!(spec.secret(), None);
        spec.secret_name = Some("creds".to_string());
        assert_eq!(spec.secret(), Some("creds"));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ManagedServerStatus {
            available_replicas: 2,
            phase: Some(ServerPhase::Running),
            observed_generation: Some(3),
            conditions: vec![],
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["availableReplicas"], 2);
        assert_eq!(value["phase"], "Running");
        assert_eq!(value["observedGeneration"], 3);
        assert!(value.get("conditions").is_none());
    }

    #[test]
    fn test_crd_metadata() {
        let crd = ManagedServer::crd();
        assert_eq!(crd.spec.group, "mcp.mcp.dev");
        assert_eq!(crd.spec.names.kind, "ManagedServer");
        assert_eq!(crd.spec.names.plural, "managedservers");
    }
}
