//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use cluster_store::MockClusterStore;
use crds::{ManagedServer, ManagedServerSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use prometheus::Registry;
use std::sync::Arc;

/// Helper to create a ManagedServer with identity metadata as the API server would set it
pub fn create_test_server(name: &str, namespace: &str, image: &str) -> ManagedServer {
    ManagedServer {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: ManagedServerSpec::new(image),
        status: None,
    }
}

/// Controlling owner reference of some other ManagedServer
pub fn foreign_owner(uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "mcp.mcp.dev/v1alpha1".to_string(),
        kind: "ManagedServer".to_string(),
        name: "intruder".to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(false),
    }
}

/// Deployment whose controller reports `ready` ready replicas
pub fn deployment_with_ready(ready: i32) -> Deployment {
    Deployment {
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Reconciler over a fresh mock store with isolated metrics
pub struct TestHarness {
    pub store: MockClusterStore,
    pub metrics: Metrics,
    pub registry: Registry,
    pub reconciler: Reconciler,
}

pub fn harness() -> TestHarness {
    harness_with(&ControllerConfig::default())
}

pub fn harness_with(config: &ControllerConfig) -> TestHarness {
    let store = MockClusterStore::new();
    let registry = Registry::new();
    let metrics = Metrics::register(&registry).unwrap();
    let reconciler = Reconciler::new(Arc::new(store.clone()), metrics.clone(), config);
    TestHarness {
        store,
        metrics,
        registry,
        reconciler,
    }
}
