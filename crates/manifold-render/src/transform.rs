//! Object-level transforms applied between parsing and apply
//!
//! Transforms run left-to-right over every parsed object. Later transforms
//! see the output of earlier ones, so order is part of the contract.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use tracing::warn;

use manifold_common::kube_utils::kind_of;
use manifold_common::parse::parse_manifest_str;
use manifold_common::{
    BaseResource, Error, MANAGED_BY_LABEL_KEY, MANAGED_BY_LABEL_VALUE, OWNER_NAMESPACE_LABEL_KEY,
    OWNER_NAME_LABEL_KEY,
};

/// Built-in kinds that never carry a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// True for well-known cluster-scoped kinds
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// A mutation applied to each object before it is written
pub trait ObjectTransform: Send + Sync {
    /// Mutate `obj` in place; `base` identifies the owning Manifest
    fn transform(&self, base: &BaseResource, obj: &mut DynamicObject) -> Result<(), Error>;
}

/// Shared list of transforms, applied in order
pub type Transforms = Vec<Box<dyn ObjectTransform>>;

/// Parse manifest text and run every transform over every object.
///
/// Undecodable documents are reported and left out of the result.
pub fn transform_manifest(
    manifest: &str,
    base: &BaseResource,
    transforms: &[Box<dyn ObjectTransform>],
) -> Result<Vec<DynamicObject>, Error> {
    let parsed = parse_manifest_str(manifest)?;
    if !parsed.blobs.is_empty() {
        warn!(
            manifest = %format!("{}/{}", base.namespace, base.name),
            blobs = parsed.blobs.len(),
            "rendered manifest contains documents that are not cluster objects"
        );
    }

    let mut objects = parsed.resources;
    for obj in objects.iter_mut() {
        for transform in transforms {
            transform.transform(base, obj)?;
        }
    }
    Ok(objects)
}

/// Force a namespace onto namespaced objects
pub struct SetNamespace(pub String);

impl ObjectTransform for SetNamespace {
    fn transform(&self, _base: &BaseResource, obj: &mut DynamicObject) -> Result<(), Error> {
        if !is_cluster_scoped_kind(kind_of(obj)) {
            obj.metadata.namespace = Some(self.0.clone());
        }
        Ok(())
    }
}

/// Label objects with the managing controller and owning Manifest
pub struct ManagedByLabels;

impl ObjectTransform for ManagedByLabels {
    fn transform(&self, base: &BaseResource, obj: &mut DynamicObject) -> Result<(), Error> {
        let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(
            MANAGED_BY_LABEL_KEY.to_string(),
            MANAGED_BY_LABEL_VALUE.to_string(),
        );
        labels.insert(OWNER_NAME_LABEL_KEY.to_string(), base.name.clone());
        labels.insert(OWNER_NAMESPACE_LABEL_KEY.to_string(), base.namespace.clone());
        Ok(())
    }
}

/// Merge a fixed annotation set into every object; existing keys are overwritten
pub struct CommonAnnotations(pub BTreeMap<String, String>);

impl ObjectTransform for CommonAnnotations {
    fn transform(&self, _base: &BaseResource, obj: &mut DynamicObject) -> Result<(), Error> {
        if self.0.is_empty() {
            return Ok(());
        }
        obj.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(self.0.clone());
        Ok(())
    }
}
