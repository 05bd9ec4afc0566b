//! Control-plane view of Manifest objects
//!
//! All reads and writes of the Manifest itself (finalizers, status) go through
//! [`ManifestStore`] so the hooks and the controller can be tested without an
//! API server.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource};

#[cfg(test)]
use mockall::automock;

use manifold_common::crd::{Manifest, ManifestStatus};
use manifold_common::error::classify_kube_error;
use manifold_common::Error;

/// Reads and writes Manifest objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Fetch a Manifest; `None` when it no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, Error>;

    /// Forced server-side apply of only the identity and finalizer fields
    async fn apply_finalizers(
        &self,
        manifest: &Manifest,
        finalizers: Vec<String>,
        field_owner: &str,
    ) -> Result<(), Error>;

    /// Full update of a Manifest as fetched and modified by the caller
    async fn update(&self, manifest: &Manifest, field_owner: &str) -> Result<(), Error>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManifestStatus,
        field_owner: &str,
    ) -> Result<(), Error>;
}

/// [`ManifestStore`] backed by the Kubernetes API
pub struct KubeManifestStore {
    client: Client,
}

impl KubeManifestStore {
    /// Create a store over `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Manifest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn identity(manifest: &Manifest) -> Result<(&str, &str), Error> {
    let name = manifest
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation_for_field("metadata.name", "Manifest has no name"))?;
    let namespace = manifest.metadata.namespace.as_deref().ok_or_else(|| {
        Error::validation_for_field("metadata.namespace", "Manifest has no namespace")
    })?;
    Ok((namespace, name))
}

#[async_trait]
impl ManifestStore for KubeManifestStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, Error> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify_kube_error(e, "Manifest", name))
    }

    async fn apply_finalizers(
        &self,
        manifest: &Manifest,
        finalizers: Vec<String>,
        field_owner: &str,
    ) -> Result<(), Error> {
        let (namespace, name) = identity(manifest)?;
        let patch = serde_json::json!({
            "apiVersion": Manifest::api_version(&()),
            "kind": Manifest::kind(&()),
            "metadata": {
                "name": name,
                "namespace": namespace,
                "finalizers": finalizers,
            }
        });
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(field_owner).force(),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| classify_kube_error(e, "Manifest", name))?;
        Ok(())
    }

    async fn update(&self, manifest: &Manifest, field_owner: &str) -> Result<(), Error> {
        let (namespace, name) = identity(manifest)?;
        let params = PostParams {
            field_manager: Some(field_owner.to_string()),
            ..Default::default()
        };
        self.api(namespace)
            .replace(name, &params, manifest)
            .await
            .map_err(|e| classify_kube_error(e, "Manifest", name))?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManifestStatus,
        field_owner: &str,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(field_owner),
                &Patch::Merge(&status_patch),
            )
            .await
            .map_err(|e| classify_kube_error(e, "Manifest", name))?;
        Ok(())
    }
}
