//! Job handler: render, change detection, apply and lifecycle hooks

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use manifold_common::crd::Manifest;
use manifold_common::hash::HashCache;
use manifold_common::DesiredState;
use manifold_render::transform::Transforms;
use manifold_render::{new_render_source, Applier, ManagedByLabels, RenderSource};

use crate::error::JobError;
use crate::hooks::{create_companion_resource, delete_companion_resource};
use crate::store::ManifestStore;
use crate::workers::{JobHandler, JobOutcome, JobResult, Operation};

/// Handles Install and Uninstall jobs for Manifests
pub struct ManifestJobHandler {
    applier: Arc<Applier>,
    store: Arc<dyn ManifestStore>,
    cache: Arc<HashCache>,
    cache_dir: PathBuf,
}

impl ManifestJobHandler {
    /// Create a handler sharing `cache` across every worker
    pub fn new(
        applier: Arc<Applier>,
        store: Arc<dyn ManifestStore>,
        cache: Arc<HashCache>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            applier,
            store,
            cache,
            cache_dir: cache_dir.into(),
        }
    }

    fn transforms() -> Transforms {
        vec![Box::new(ManagedByLabels)]
    }

    fn render(source: &dyn RenderSource, desired: &DesiredState) -> Result<String, JobError> {
        source.get_raw_manifest(desired).into_result().map_err(|e| {
            error!(
                manifest = %desired.key(),
                renderer = source.name(),
                source = %desired.source,
                error = %e,
                "failed to render manifest"
            );
            JobError::from(e)
        })
    }

    async fn install(&self, manifest: &Manifest) -> JobResult {
        let desired = DesiredState::from_manifest(manifest)?;
        let key = desired.key();
        let hash = desired.content_hash()?;
        if self.cache.is_current(&key, hash) {
            debug!(manifest = %key, hash, "content unchanged, skipping apply");
            return Ok(JobOutcome::Unchanged { hash });
        }

        let source = new_render_source(desired.renderer, self.applier.clone(), &self.cache_dir);
        let rendered = Self::render(source.as_ref(), &desired)?;
        source
            .install(&rendered, &desired, &Self::transforms())
            .await?;

        create_companion_resource(&self.applier, self.store.as_ref(), manifest, &desired).await?;

        // Recorded last so any failure above is retried in full
        self.cache.record(&key, hash);
        info!(manifest = %key, hash, "manifest installed");
        Ok(JobOutcome::Installed { hash })
    }

    async fn uninstall(&self, manifest: &Manifest) -> JobResult {
        let desired = DesiredState::from_manifest(manifest)?;
        let key = desired.key();

        delete_companion_resource(&self.applier, self.store.as_ref(), manifest, &desired).await?;

        let source = new_render_source(desired.renderer, self.applier.clone(), &self.cache_dir);
        let rendered = Self::render(source.as_ref(), &desired)?;
        let all_absent = source
            .uninstall(&rendered, &desired, &Self::transforms())
            .await?;
        self.cache.forget(&key);

        if all_absent {
            info!(manifest = %key, "manifest uninstalled");
            Ok(JobOutcome::Uninstalled)
        } else {
            debug!(manifest = %key, "deletions issued, waiting for removal");
            Ok(JobOutcome::Uninstalling)
        }
    }
}

#[async_trait]
impl JobHandler for ManifestJobHandler {
    async fn handle(&self, manifest: Arc<Manifest>, operation: Operation) -> JobResult {
        match operation {
            Operation::Install => self.install(&manifest).await,
            Operation::Uninstall => self.uninstall(&manifest).await,
        }
    }
}
