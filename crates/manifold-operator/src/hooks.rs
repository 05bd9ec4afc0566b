//! Companion resource lifecycle hooks
//!
//! A Manifest may embed a default resource template. The companion resource
//! built from it is bound to the Manifest by [`COMPANION_FINALIZER`]:
//!
//! - no finalizer: the companion is not guaranteed to exist
//! - finalizer present: the companion may exist and must be removed before
//!   the Manifest is allowed to go away
//!
//! The finalizer is added only after the companion is created (or found to
//! exist) and removed only after it is deleted (or found absent). Both hooks
//! can be re-run after a crash at any point.

use kube::api::DynamicObject;
use tracing::{debug, info};

use manifold_common::crd::Manifest;
use manifold_common::kube_utils::{add_finalizer, name_of, remove_finalizer};
use manifold_common::{DesiredState, Error, COMPANION_FINALIZER};
use manifold_render::Applier;

use crate::store::ManifestStore;

/// Decode the embedded template into an object
fn companion_object(template: &serde_json::Value) -> Result<DynamicObject, Error> {
    let obj: DynamicObject = serde_json::from_value(template.clone()).map_err(|e| {
        Error::serialization_for_kind("companion resource", format!("invalid template: {e}"))
    })?;
    if name_of(&obj).is_empty() {
        return Err(Error::validation_for_field(
            "spec.resource.metadata.name",
            "companion resource template has no name",
        ));
    }
    Ok(obj)
}

/// Post-creation hook.
///
/// Creates the companion resource ("already exists" is success), then adds
/// the companion finalizer with a server-side apply of only the identity and
/// finalizer fields.
pub async fn create_companion_resource(
    applier: &Applier,
    store: &dyn ManifestStore,
    manifest: &Manifest,
    desired: &DesiredState,
) -> Result<(), Error> {
    let Some(template) = manifest.companion_template() else {
        return Ok(());
    };
    let resource = companion_object(template)?;

    if applier.create(desired, &resource).await? {
        info!(manifest = %desired.key(), resource = name_of(&resource), "created companion resource");
    }

    let mut meta = manifest.metadata.clone();
    if !add_finalizer(&mut meta, COMPANION_FINALIZER) {
        return Ok(());
    }
    store
        .apply_finalizers(manifest, meta.finalizers.unwrap_or_default(), applier.field_owner())
        .await?;
    debug!(manifest = %desired.key(), "added companion finalizer");
    Ok(())
}

/// Pre-deletion hook.
///
/// Deletes the companion resource ("not found" is success), then removes the
/// companion finalizer from a freshly fetched Manifest. A Manifest that is
/// already gone needs nothing more.
pub async fn delete_companion_resource(
    applier: &Applier,
    store: &dyn ManifestStore,
    manifest: &Manifest,
    desired: &DesiredState,
) -> Result<(), Error> {
    let Some(template) = manifest.companion_template() else {
        return Ok(());
    };
    let resource = companion_object(template)?;

    match applier.delete_one(desired, &resource).await {
        Ok(true) => {
            info!(manifest = %desired.key(), resource = name_of(&resource), "deleted companion resource")
        }
        Ok(false) => debug!(manifest = %desired.key(), "companion resource already absent"),
        Err(e) => return Err(e),
    }

    let owner = &desired.owner;
    let Some(mut current) = store.get(&owner.namespace, &owner.name).await? else {
        return Ok(());
    };
    if !remove_finalizer(&mut current.metadata, COMPANION_FINALIZER) {
        return Ok(());
    }
    match store.update(&current, applier.field_owner()).await {
        Ok(()) => {
            debug!(manifest = %desired.key(), "removed companion finalizer");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
