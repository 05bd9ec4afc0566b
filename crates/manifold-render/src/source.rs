//! Render source contract shared by every backend
//!
//! A render source turns a desired state into manifest text and drives that
//! text through transforms into the Applier. The worker pool and job handler
//! only ever see `dyn RenderSource`.

use async_trait::async_trait;
use kube::api::DynamicObject;

use manifold_common::{BaseResource, DesiredState, Error};

use crate::applier::Applier;
use crate::transform::{transform_manifest, ObjectTransform};

/// Rendered manifest text plus the backend error, if any.
///
/// The text may be non-empty even when rendering failed so callers can
/// inspect it, but `error` is authoritative.
#[derive(Debug, Default)]
pub struct RenderResult {
    /// Manifest text, possibly partial
    pub manifest: String,
    /// Backend failure
    pub error: Option<Error>,
}

impl RenderResult {
    /// Successful render
    pub fn ok(manifest: String) -> Self {
        Self {
            manifest,
            error: None,
        }
    }

    /// Failed render with whatever text was produced
    pub fn failed(manifest: String, error: Error) -> Self {
        Self {
            manifest,
            error: Some(error),
        }
    }

    /// True when no error was recorded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Manifest text, or the render error
    pub fn into_result(self) -> Result<String, Error> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.manifest),
        }
    }
}

/// Renders a bundle and applies it through the Applier
#[async_trait]
pub trait RenderSource: Send + Sync {
    /// Backend name used in errors and logs
    fn name(&self) -> &'static str;

    /// Applier used by install and uninstall
    fn applier(&self) -> &Applier;

    /// Produce manifest text. Never touches the cluster; failures are
    /// returned inside the result.
    fn get_raw_manifest(&self, desired: &DesiredState) -> RenderResult;

    /// Parse `manifest` and run `transforms` left-to-right over each object
    fn transform(
        &self,
        manifest: &str,
        base: &BaseResource,
        transforms: &[Box<dyn ObjectTransform>],
    ) -> Result<Vec<DynamicObject>, Error> {
        transform_manifest(manifest, base, transforms)
    }

    /// Transform then server-side apply; true once every object is applied
    async fn install(
        &self,
        manifest: &str,
        desired: &DesiredState,
        transforms: &[Box<dyn ObjectTransform>],
    ) -> Result<bool, Error> {
        let objects = self.transform(manifest, &desired.owner, transforms)?;
        self.applier().apply(desired, &objects, None).await?;
        Ok(true)
    }

    /// Transform then delete; true once every object is confirmed absent
    async fn uninstall(
        &self,
        manifest: &str,
        desired: &DesiredState,
        transforms: &[Box<dyn ObjectTransform>],
    ) -> Result<bool, Error> {
        let objects = self.transform(manifest, &desired.owner, transforms)?;
        self.applier().delete(desired, &objects, None).await
    }

    /// Whether live state matches the rendered manifest.
    ///
    /// Re-applies the whole bundle and treats success as consistency. This
    /// costs a full apply per call.
    async fn is_consistent(
        &self,
        manifest: &str,
        desired: &DesiredState,
        transforms: &[Box<dyn ObjectTransform>],
    ) -> Result<bool, Error> {
        self.install(manifest, desired, transforms).await
    }
}
