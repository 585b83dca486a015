//! Controller-specific error types.
//!
//! Every variant maps to a stable CamelCase reason via [`ControllerError::reason`],
//! which is what ends up in the `Reconciled` condition of a failed pass.

use cluster_store::StoreError;
use kube::Error as KubeError;
use std::fmt;
use thiserror::Error;

/// The two children a ManagedServer owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// The Deployment running the server pods
    Workload,
    /// The Service exposing them
    Endpoint,
}

impl ChildKind {
    /// Value of the `kind` label on the child-error counter.
    pub fn metric_label(self) -> &'static str {
        match self {
            ChildKind::Workload => "deployment",
            ChildKind::Endpoint => "service",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKind::Workload => f.write_str("Deployment"),
            ChildKind::Endpoint => f.write_str("Service"),
        }
    }
}

/// Errors that can occur in the ManagedServer controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside the store (client construction)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The child exists but is controlled by someone else
    #[error("{kind} {name} is owned by another controller (owner uid {owner_uid})")]
    OwnershipCollision {
        kind: String,
        name: String,
        owner_uid: String,
    },

    /// Replace kept losing optimistic-concurrency races
    #[error("{kind} {name}: gave up after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        kind: String,
        name: String,
        attempts: u32,
    },

    /// Parent is missing identity metadata
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Convergence of one child failed
    #[error("Converging {kind} failed: {source}")]
    Child {
        kind: ChildKind,
        #[source]
        source: Box<ControllerError>,
    },

    /// Writing the parent status failed
    #[error("Status update failed: {0}")]
    Status(#[source] Box<ControllerError>),

    /// The reconcile attempt exceeded its deadline
    #[error("Reconciliation timed out after {0}s")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Socket or listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Wraps a convergence error with the child it happened on.
    pub fn child(kind: ChildKind, source: impl Into<ControllerError>) -> Self {
        ControllerError::Child {
            kind,
            source: Box::new(source.into()),
        }
    }

    /// Wraps a status write failure.
    pub fn status(source: impl Into<ControllerError>) -> Self {
        ControllerError::Status(Box::new(source.into()))
    }

    /// The child this error is attributed to, if any.
    pub fn child_kind(&self) -> Option<ChildKind> {
        match self {
            ControllerError::Child { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Stable CamelCase reason for conditions and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "KubeError",
            ControllerError::Store(err) => match err {
                StoreError::NotFound(_) => "NotFound",
                StoreError::Conflict(_) => "Conflict",
                StoreError::AlreadyExists(_) => "AlreadyExists",
                StoreError::Unavailable(_) => "StoreUnavailable",
                StoreError::InvalidObject(_) => "InvalidObject",
                StoreError::Kube(_) => "KubeError",
            },
            ControllerError::OwnershipCollision { .. } => "OwnershipCollision",
            ControllerError::ConflictRetriesExhausted { .. } => "ConflictRetriesExhausted",
            ControllerError::Validation(_) => "ValidationFailed",
            ControllerError::Child { source, .. } => source.reason(),
            ControllerError::Status(_) => "StatusUpdateFailed",
            ControllerError::Timeout(_) => "ReconcileTimeout",
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::Metrics(_) => "MetricsError",
            ControllerError::Io(_) => "IoError",
            ControllerError::Watch(_) => "WatchFailed",
        }
    }

    /// Whether a prompt retry can succeed without anyone editing the objects involved.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Store(err) => err.is_transient(),
            ControllerError::Child { source, .. } | ControllerError::Status(source) => source.is_transient(),
            ControllerError::Kube(_)
            | ControllerError::ConflictRetriesExhausted { .. }
            | ControllerError::Timeout(_)
            | ControllerError::Watch(_) => true,
            ControllerError::OwnershipCollision { .. }
            | ControllerError::Validation(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::Metrics(_)
            | ControllerError::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_error_reports_inner_reason() {
        let err = ControllerError::child(
            ChildKind::Endpoint,
            StoreError::Unavailable("injected".to_string()),
        );
        assert_eq!(err.reason(), "StoreUnavailable");
        assert_eq!(err.child_kind(), Some(ChildKind::Endpoint));
        assert!(err.to_string().starts_with("Converging Service failed"));
    }

    #[test]
    fn test_collision_reason() {
        let err = ControllerError::child(
            ChildKind::Workload,
            ControllerError::OwnershipCollision {
                kind: "Deployment".to_string(),
                name: "web".to_string(),
                owner_uid: "other".to_string(),
            },
        );
        assert_eq!(err.reason(), "OwnershipCollision");
    }

    #[test]
    fn test_transient_errors() {
        let unavailable = ControllerError::child(ChildKind::Workload, StoreError::Unavailable("503".to_string()));
        assert!(unavailable.is_transient());
        assert!(ControllerError::status(StoreError::Conflict("stale".to_string())).is_transient());
        assert!(ControllerError::Timeout(30).is_transient());

        let collision = ControllerError::child(
            ChildKind::Endpoint,
            ControllerError::OwnershipCollision {
                kind: "Service".to_string(),
                name: "web".to_string(),
                owner_uid: "none".to_string(),
            },
        );
        assert!(!collision.is_transient());
        assert!(!ControllerError::from(StoreError::InvalidObject("no name".to_string())).is_transient());
    }

    #[test]
    fn test_child_kind_labels() {
        assert_eq!(ChildKind::Workload.metric_label(), "deployment");
        assert_eq!(ChildKind::Endpoint.metric_label(), "service");
        assert_eq!(ChildKind::Workload.to_string(), "Deployment");
    }
}
