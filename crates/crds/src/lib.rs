//! ManagedServer CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the ManagedServer controller.

pub mod managed_server;

pub use managed_server::*;
