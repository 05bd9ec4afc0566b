//! Shared Kubernetes helpers using kube-rs types

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, GroupVersionKind};

use crate::Error;

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use manifold_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Group/version/kind of a decoded object
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = obj.types.as_ref().ok_or_else(|| {
        Error::validation(format!(
            "object {} has no apiVersion/kind",
            obj.metadata.name.as_deref().unwrap_or_default()
        ))
    })?;
    let (group, version) = parse_api_version(&types.api_version);
    Ok(GroupVersionKind::gvk(&group, &version, &types.kind))
}

/// Render a GVK the way API server messages do: `group/version, Kind=kind`
pub fn gvk_display(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}, Kind={}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Kind of a decoded object, or empty when untyped
pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// Name of a decoded object, or empty when unnamed
pub fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

/// True when `finalizer` is present on the object
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == finalizer))
}

/// Add `finalizer`, returning true if the list changed
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove `finalizer`, returning true if the list changed
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::TypeMeta;

    fn object(api_version: &str, kind: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                ..Default::default()
            },
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_parse_api_version_crd() {
        let (group, version) = parse_api_version("operator.manifold.dev/v1alpha1");
        assert_eq!(group, "operator.manifold.dev");
        assert_eq!(version, "v1alpha1");
    }

    #[test]
    fn test_gvk_of_core_and_grouped() {
        let gvk = gvk_of(&object("v1", "ConfigMap")).unwrap();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk_display(&gvk), "v1, Kind=ConfigMap");

        let gvk = gvk_of(&object("apps/v1", "Deployment")).unwrap();
        assert_eq!(gvk_display(&gvk), "apps/v1, Kind=Deployment");
    }

    #[test]
    fn test_gvk_of_untyped_object_fails() {
        let mut obj = object("v1", "ConfigMap");
        obj.types = None;
        assert!(gvk_of(&obj).is_err());
        assert_eq!(kind_of(&obj), "");
        assert_eq!(name_of(&obj), "demo");
    }

    #[test]
    fn test_finalizer_helpers_are_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(!has_finalizer(&meta, "a/b"));
        assert!(add_finalizer(&mut meta, "a/b"));
        assert!(!add_finalizer(&mut meta, "a/b"));
        assert_eq!(meta.finalizers.as_ref().unwrap().len(), 1);

        assert!(add_finalizer(&mut meta, "c/d"));
        assert!(remove_finalizer(&mut meta, "a/b"));
        assert!(!remove_finalizer(&mut meta, "a/b"));
        assert_eq!(meta.finalizers, Some(vec!["c/d".to_string()]));
    }

    #[test]
    fn test_remove_finalizer_without_list() {
        let mut meta = ObjectMeta::default();
        assert!(!remove_finalizer(&mut meta, "a/b"));
        assert!(meta.finalizers.is_none());
    }
}
