//! Desired state derived from a Manifest
//!
//! One `DesiredState` describes one reconcilable unit. It is built fresh for
//! every reconciliation attempt and never mutated afterwards.

use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use crate::crd::{ContentSource, Manifest, RendererKind};
use crate::hash::content_hash;
use crate::Error;

/// Namespace used when neither the object nor the Manifest names one
pub const FALLBACK_NAMESPACE: &str = "default";

/// Identity of the owning Manifest, handed to object transforms
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseResource {
    /// apiVersion of the owner
    pub api_version: String,
    /// Kind of the owner
    pub kind: String,
    /// Name of the owner
    pub name: String,
    /// Namespace of the owner
    pub namespace: String,
    /// UID, absent for objects not yet persisted
    pub uid: Option<String>,
}

impl BaseResource {
    /// Identity of a Manifest; fails when it has no name or namespace
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, Error> {
        let name = manifest
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation_for_field("metadata.name", "manifest has no name"))?;
        let namespace = manifest.namespace().filter(|n| !n.is_empty()).ok_or_else(|| {
            Error::validation_for_field(
                "metadata.namespace",
                format!("manifest {name} has no namespace"),
            )
        })?;

        Ok(Self {
            api_version: Manifest::api_version(&()).to_string(),
            kind: Manifest::kind(&()).to_string(),
            name,
            namespace,
            uid: manifest.uid(),
        })
    }
}

/// What one reconciliation pass drives the target cluster toward
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    /// Release name exposed to templates
    pub release_name: String,
    /// Where the bundle content lives
    pub source: ContentSource,
    /// Backend that renders the bundle
    pub renderer: RendererKind,
    /// Default namespace for namespaced objects
    pub target_namespace: Option<String>,
    /// Value overrides, `Null` when none were given
    pub values: Value,
    /// Owning Manifest
    pub owner: BaseResource,
}

#[derive(Serialize)]
struct HashInput<'a> {
    release_name: &'a str,
    source: &'a ContentSource,
    values: &'a Value,
    renderer: RendererKind,
    target_namespace: Option<&'a str>,
}

impl DesiredState {
    /// Build and validate the desired state of a Manifest
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, Error> {
        let owner = BaseResource::from_manifest(manifest)?;
        let install = &manifest.spec.install;

        if install.name.trim().is_empty() {
            return Err(Error::validation_for_field(
                "spec.install.name",
                "release name cannot be empty",
            ));
        }

        match &install.source {
            ContentSource::Local { path } if path.trim().is_empty() => {
                return Err(Error::validation_for_field(
                    "spec.install.source.path",
                    "local source path cannot be empty",
                ));
            }
            ContentSource::Remote {
                repository,
                name,
                reference,
            } => {
                for (field, value) in [
                    ("repository", repository),
                    ("name", name),
                    ("reference", reference),
                ] {
                    if value.trim().is_empty() {
                        return Err(Error::validation_for_field(
                            format!("spec.install.source.{field}"),
                            format!("remote source {field} cannot be empty"),
                        ));
                    }
                }
            }
            ContentSource::Local { .. } => {}
        }

        let values = manifest.spec.values.clone().unwrap_or(Value::Null);
        if !(values.is_null() || values.is_object()) {
            return Err(Error::validation_for_field(
                "spec.values",
                "values must be an object",
            ));
        }

        Ok(Self {
            release_name: install.name.clone(),
            source: install.source.clone(),
            renderer: install.renderer,
            target_namespace: manifest
                .spec
                .target_namespace
                .clone()
                .filter(|n| !n.is_empty()),
            values,
            owner,
        })
    }

    /// Change-detection key over every input that reaches rendering
    pub fn content_hash(&self) -> Result<u32, Error> {
        content_hash(&HashInput {
            release_name: &self.release_name,
            source: &self.source,
            values: &self.values,
            renderer: self.renderer,
            target_namespace: self.target_namespace.as_deref(),
        })
    }

    /// Namespace for namespaced objects that do not set their own
    pub fn default_namespace(&self) -> &str {
        self.target_namespace.as_deref().unwrap_or(FALLBACK_NAMESPACE)
    }

    /// `namespace/name` of the owning Manifest
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner.namespace, self.owner.name)
    }
}
