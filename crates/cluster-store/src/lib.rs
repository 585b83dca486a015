//! Cluster state store for the ManagedServer controller.
//!
//! Provides the narrow capability the reconciler needs from the cluster: get, list,
//! create and replace of the parent and its children, plus a status-subresource
//! write path for the parent.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{ClusterStore, KubeStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client);
//!
//! if let Some(server) = store.get_server("default", "weather").await? {
//!     println!("image: {}", server.spec.image);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `test-util`: enables [`MockClusterStore`], an in-memory implementation with
//!   resource versions, fault injection and owner-reference cascade deletion.

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use store_trait::ClusterStore;
#[cfg(feature = "test-util")]
pub use mock::{Fault, MockCall, MockClusterStore, MockOp};
