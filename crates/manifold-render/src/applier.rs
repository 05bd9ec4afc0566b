//! Server-side apply and delete of rendered objects
//!
//! The Applier is the only component that writes to the target cluster.
//! Every write is attributed to one stable field owner and applied with
//! forced ownership, so repeated applies are idempotent.

use std::sync::Arc;

use kube::api::{DynamicObject, GroupVersionKind};
use tracing::{debug, info, warn};

use manifold_common::kube_utils::{gvk_display, gvk_of, kind_of, name_of};
use manifold_common::{DesiredState, Error};

use crate::client::DynamicClient;
use crate::mapper::{RestMapper, RestMapping};

/// Applies and deletes object batches for a desired state
pub struct Applier {
    client: Arc<dyn DynamicClient>,
    mapper: Arc<dyn RestMapper>,
    field_owner: String,
}

impl Applier {
    /// Create an applier writing as `field_owner`
    pub fn new(
        client: Arc<dyn DynamicClient>,
        mapper: Arc<dyn RestMapper>,
        field_owner: impl Into<String>,
    ) -> Self {
        Self {
            client,
            mapper,
            field_owner: field_owner.into(),
        }
    }

    /// Field manager used for every write
    pub fn field_owner(&self) -> &str {
        &self.field_owner
    }

    /// Forced server-side apply of every object, in order.
    ///
    /// The first failure aborts the batch; objects before it stay applied.
    pub async fn apply(
        &self,
        desired: &DesiredState,
        resources: &[DynamicObject],
        namespace_override: Option<&str>,
    ) -> Result<(), Error> {
        for obj in resources {
            let mapping = self.resolve_mapping(obj).await?;
            let namespace = resolve_namespace(&mapping, obj, namespace_override, desired);
            self.client
                .apply(&mapping, namespace, obj, &self.field_owner)
                .await
                .inspect_err(|e| {
                    warn!(
                        kind = kind_of(obj),
                        name = name_of(obj),
                        manifest = %desired.key(),
                        error = %e,
                        "server-side apply failed"
                    )
                })?;
        }
        info!(
            manifest = %desired.key(),
            resources = resources.len(),
            "applied resources"
        );
        Ok(())
    }

    /// Delete every object in reverse order.
    ///
    /// Returns true when every object was already absent, false when at least
    /// one deletion was issued and may still be in progress. Absent objects are
    /// never an error, so calling this twice is as safe as calling it once.
    /// A kind that is no longer served, such as one whose CRD went earlier in
    /// the batch, has no instances left and counts as absent.
    pub async fn delete(
        &self,
        desired: &DesiredState,
        resources: &[DynamicObject],
        namespace_override: Option<&str>,
    ) -> Result<bool, Error> {
        let mut all_absent = true;
        for obj in resources.iter().rev() {
            let mapping = match self.resolve_mapping(obj).await {
                Ok(mapping) => mapping,
                Err(e) if e.is_no_match() => {
                    debug!(kind = kind_of(obj), name = name_of(obj), error = %e, "kind not served, already absent");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let namespace = resolve_namespace(&mapping, obj, namespace_override, desired);
            match self.client.delete(&mapping, namespace, name_of(obj)).await {
                Ok(()) => {
                    all_absent = false;
                    debug!(kind = kind_of(obj), name = name_of(obj), "deletion issued");
                }
                Err(e) if e.is_not_found() => {
                    debug!(kind = kind_of(obj), name = name_of(obj), "already absent");
                }
                Err(e) => {
                    warn!(
                        kind = kind_of(obj),
                        name = name_of(obj),
                        manifest = %desired.key(),
                        error = %e,
                        "delete failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(all_absent)
    }

    /// Create one object; returns false when it already existed
    pub async fn create(&self, desired: &DesiredState, obj: &DynamicObject) -> Result<bool, Error> {
        let mapping = self.resolve_mapping(obj).await?;
        let namespace = resolve_namespace(&mapping, obj, None, desired);
        match self
            .client
            .create(&mapping, namespace, obj, &self.field_owner)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!(kind = kind_of(obj), name = name_of(obj), "already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete one object; returns false when it was already absent
    pub async fn delete_one(
        &self,
        desired: &DesiredState,
        obj: &DynamicObject,
    ) -> Result<bool, Error> {
        self.delete(desired, std::slice::from_ref(obj), None)
            .await
            .map(|absent| !absent)
    }

    /// Resolve the REST mapping of an object.
    ///
    /// A `NoMatch` resets the shared mapper once and retries; a second
    /// failure is returned as `NoMatch`.
    async fn resolve_mapping(&self, obj: &DynamicObject) -> Result<RestMapping, Error> {
        let gvk = gvk_of(obj)?;
        match self.mapper.mapping(&gvk).await {
            Ok(mapping) => Ok(mapping),
            Err(e) if e.is_no_match() => {
                debug!(gvk = %gvk_display(&gvk), "no REST mapping, resetting mapper");
                self.mapper.reset();
                self.mapper
                    .mapping(&gvk)
                    .await
                    .map_err(|e| resolution_failed(&gvk, e))
            }
            Err(e) => Err(e),
        }
    }
}

fn resolution_failed(gvk: &GroupVersionKind, err: Error) -> Error {
    Error::no_match(
        gvk_display(gvk),
        format!("rest mapping could not be resolved after reset: {err}"),
    )
}

/// Namespace an object is written to.
///
/// Cluster-scoped kinds get none. Namespaced kinds use the override, then
/// the object's own namespace, then the desired state's default.
fn resolve_namespace(
    mapping: &RestMapping,
    obj: &DynamicObject,
    namespace_override: Option<&str>,
    desired: &DesiredState,
) -> Option<String> {
    if !mapping.namespaced {
        return None;
    }
    let namespace = namespace_override
        .filter(|ns| !ns.is_empty())
        .or_else(|| obj.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()))
        .unwrap_or_else(|| desired.default_namespace());
    Some(namespace.to_string())
}
