//! Cluster store errors

use thiserror::Error;

/// Errors returned by [`ClusterStore`](crate::ClusterStore) operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency collision: the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create raced with another creator
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// API server unavailable or throttling
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Object is missing metadata required for the call
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Any other Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    /// Maps a kube client error onto the store taxonomy using the API status code.
    pub fn from_kube(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(status) => {
                let message = status.message.clone();
                match status.code {
                    404 => StoreError::NotFound(message),
                    409 if status.reason == "AlreadyExists" => StoreError::AlreadyExists(message),
                    409 => StoreError::Conflict(message),
                    429 | 500 | 503 | 504 => StoreError::Unavailable(message),
                    _ => StoreError::Kube(err),
                }
            }
            _ => StoreError::Kube(err),
        }
    }

    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_) | StoreError::AlreadyExists(_) | StoreError::Unavailable(_) | StoreError::Kube(_)
        )
    }
}
