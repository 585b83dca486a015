//! Convergence engine.
//!
//! Brings one child in line with its desired form. Deciding what to do is a pure
//! step ([`plan`]) over the fetched object; [`converge_child`] fetches, plans and
//! applies the plan, retrying on optimistic-concurrency conflicts.

use super::builder::BuildOptions;
use super::ownership::{is_stamped, stamp, verify};
use crate::error::{ChildKind, ControllerError};
use cluster_store::{ClusterStore, StoreError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A child kind the engine knows how to fetch, compare and write.
#[async_trait::async_trait]
pub trait ChildResource: Resource<DynamicType = ()> + Clone + Send + Sync + Sized + 'static {
    const KIND: ChildKind;

    async fn fetch(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<Option<Self>, StoreError>;

    async fn create(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError>;

    async fn replace(store: &dyn ClusterStore, obj: &Self) -> Result<Self, StoreError>;

    /// Whether any builder-derived field of `self` differs from `desired`.
    fn drifted(&self, desired: &Self, options: &BuildOptions) -> bool;

    /// Copies the builder-derived fields of `desired` into `self`, keeping everything else.
    fn converge(&mut self, desired: &Self, options: &BuildOptions);
}

/// What to do with one child
#[derive(Debug, Clone, PartialEq)]
pub enum ChildPlan<K> {
    /// Child is absent: create this object
    Create(K),
    /// Child drifted: replace with this object (carries the fetched resourceVersion)
    Update(K),
    /// Child already matches
    Unchanged(K),
}

/// Result of converging one child
#[derive(Debug, Clone, PartialEq)]
pub enum Converged<K> {
    Created(K),
    Updated(K),
    Unchanged(K),
}

fn labels_drifted(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    desired.iter().any(|(k, v)| current.get(k) != Some(v))
}

/// Decides how to bring `existing` to `desired`.
///
/// Fails with `OwnershipCollision` when `existing` belongs to someone else.
pub fn plan<K: ChildResource>(
    existing: Option<K>,
    desired: &K,
    owner: &OwnerReference,
    options: &BuildOptions,
) -> Result<ChildPlan<K>, ControllerError> {
    let Some(mut current) = existing else {
        let mut obj = desired.clone();
        stamp(&mut obj, owner);
        return Ok(ChildPlan::Create(obj));
    };

    verify(&current, owner)?;

    let drifted = current.drifted(desired, options) || labels_drifted(current.labels(), desired.labels());
    if !drifted && is_stamped(&current, owner) {
        return Ok(ChildPlan::Unchanged(current));
    }

    current.converge(desired, options);
    current.labels_mut().extend(desired.labels().clone());
    stamp(&mut current, owner);
    Ok(ChildPlan::Update(current))
}

/// Fetches, plans and applies one child, retrying lost races up to `max_attempts` times.
pub async fn converge_child<K: ChildResource>(
    store: &dyn ClusterStore,
    desired: &K,
    owner: &OwnerReference,
    max_attempts: u32,
    options: &BuildOptions,
) -> Result<Converged<K>, ControllerError> {
    let kind = K::kind(&()).to_string();
    let name = desired.name_any();
    let namespace = desired
        .namespace()
        .ok_or_else(|| ControllerError::Validation(format!("{kind} {name} has no namespace")))?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let existing = K::fetch(store, &namespace, &name).await?;

        let lost_race = match plan(existing, desired, owner, options)? {
            ChildPlan::Unchanged(obj) => {
                debug!(%kind, %namespace, %name, "Child up to date");
                return Ok(Converged::Unchanged(obj));
            }
            ChildPlan::Create(obj) => match K::create(store, &obj).await {
                Ok(created) => {
                    info!(%kind, %namespace, %name, "Created child");
                    return Ok(Converged::Created(created));
                }
                Err(e @ StoreError::AlreadyExists(_)) => e,
                Err(e) => return Err(e.into()),
            },
            ChildPlan::Update(obj) => match K::replace(store, &obj).await {
                Ok(updated) => {
                    info!(%kind, %namespace, %name, "Updated child");
                    return Ok(Converged::Updated(updated));
                }
                Err(e @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => e,
                Err(e) => return Err(e.into()),
            },
        };

        if attempt >= max_attempts {
            return Err(ControllerError::ConflictRetriesExhausted { kind, name, attempts: attempt });
        }
        warn!(%kind, %namespace, %name, attempt, error = %lost_race, "Lost write race, retrying");
    }
}
