//! Owner references between a ManagedServer and its children.
//!
//! The controlling reference lets the garbage collector cascade deletion of the
//! parent. A child controlled by anything else is never touched.

use super::builder::{MANAGED_BY_LABEL, MANAGER};
use crate::error::ControllerError;
use crds::ManagedServer;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// Controlling owner reference pointing at `parent`.
pub fn owner_reference(parent: &ManagedServer) -> Result<OwnerReference, ControllerError> {
    let mut reference = parent.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::Validation(format!("ManagedServer {} has no uid", parent.name_any()))
    })?;
    reference.block_owner_deletion = Some(false);
    Ok(reference)
}

/// Sets `owner` on `child`, replacing any earlier copy with the same uid.
pub fn stamp<K: Resource>(child: &mut K, owner: &OwnerReference) {
    let references = child.meta_mut().owner_references.get_or_insert_with(Vec::new);
    references.retain(|r| r.uid != owner.uid);
    references.push(owner.clone());
}

/// Whether `child` already carries `owner` as its controller.
pub fn is_stamped<K: Resource>(child: &K, owner: &OwnerReference) -> bool {
    child
        .owner_references()
        .iter()
        .any(|r| r.uid == owner.uid && r.controller == Some(true))
}

fn is_managed<K: Resource>(child: &K) -> bool {
    child.labels().get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGER)
}

/// Checks that `child` may be adopted or mutated on behalf of `owner`.
pub fn verify<K>(child: &K, owner: &OwnerReference) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()>,
{
    let collision = |owner_uid: &str| ControllerError::OwnershipCollision {
        kind: K::kind(&()).to_string(),
        name: child.name_any(),
        owner_uid: owner_uid.to_string(),
    };

    let foreign = child.owner_references().iter().find(|r| {
        r.uid != owner.uid
            && (r.controller == Some(true) || (r.kind == owner.kind && r.api_version == owner.api_version))
    });
    if let Some(foreign) = foreign {
        return Err(collision(&foreign.uid));
    }

    let ours = child.owner_references().iter().any(|r| r.uid == owner.uid);
    if ours || is_managed(child) {
        Ok(())
    } else {
        Err(collision("none"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_server, foreign_owner};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn deployment(labels: Option<BTreeMap<String, String>>, owners: Vec<OwnerReference>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                labels,
                owner_references: Some(owners),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn managed_labels() -> Option<BTreeMap<String, String>> {
        Some(BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGER.to_string())]))
    }

    #[test]
    fn test_owner_reference_fields() {
        let parent = create_test_server("web", "default", "a:v1");
        let reference = owner_reference(&parent).unwrap();
        assert_eq!(reference.api_version, "mcp.mcp.dev/v1alpha1");
        assert_eq!(reference.kind, "ManagedServer");
        assert_eq!(reference.name, "web");
        assert_eq!(Some(reference.uid.as_str()), parent.metadata.uid.as_deref());
        assert_eq!(reference.controller, Some(true));
        assert_eq!(reference.block_owner_deletion, Some(false));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut parent = create_test_server("web", "default", "a:v1");
        parent.metadata.uid = None;
        assert!(matches!(owner_reference(&parent), Err(ControllerError::Validation(_))));
    }

    #[test]
    fn test_stamp_replaces_stale_copy_and_keeps_others() {
        let parent = create_test_server("web", "default", "a:v1");
        let owner = owner_reference(&parent).unwrap();
        let mut stale = owner.clone();
        stale.name = "old-name".to_string();
        let mut unrelated = foreign_owner("other-uid");
        unrelated.controller = None;
        unrelated.kind = "ConfigMap".to_string();
        unrelated.api_version = "v1".to_string();

        let mut child = deployment(None, vec![stale, unrelated.clone()]);
        stamp(&mut child, &owner);

        let references = child.owner_references();
        assert_eq!(references.len(), 2);
        assert!(references.contains(&unrelated));
        assert!(references.contains(&owner));
        assert!(is_stamped(&child, &owner));
    }

    #[test]
    fn test_verify_accepts_owned_or_labelled_child() {
        let parent = create_test_server("web", "default", "a:v1");
        let owner = owner_reference(&parent).unwrap();

        assert!(verify(&deployment(None, vec![owner.clone()]), &owner).is_ok());
        // Owner reference stripped, label still marks it as ours
        assert!(verify(&deployment(managed_labels(), vec![]), &owner).is_ok());
    }

    #[test]
    fn test_verify_rejects_foreign_controller() {
        let parent = create_test_server("web", "default", "a:v1");
        let owner = owner_reference(&parent).unwrap();
        let child = deployment(managed_labels(), vec![foreign_owner("other-uid")]);

        match verify(&child, &owner) {
            Err(ControllerError::OwnershipCollision { kind, name, owner_uid }) => {
                assert_eq!(kind, "Deployment");
                assert_eq!(name, "web");
                assert_eq!(owner_uid, "other-uid");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_rejects_unmanaged_child() {
        let parent = create_test_server("web", "default", "a:v1");
        let owner = owner_reference(&parent).unwrap();
        let err = verify(&deployment(None, vec![]), &owner).unwrap_err();
        assert_eq!(err.reason(), "OwnershipCollision");
    }
}
