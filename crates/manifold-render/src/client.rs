//! Dynamic object writes against the target cluster
//!
//! The only seam through which manifold mutates the target cluster. Status
//! codes are translated here: callers see `Error::NotFound` and
//! `Error::AlreadyExists`, never raw 404/409 responses.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::trace;

use manifold_common::error::classify_kube_error;
use manifold_common::Error;

use crate::mapper::RestMapping;

/// Write operations over arbitrary objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DynamicClient: Send + Sync {
    /// Forced server-side apply under `field_owner`
    async fn apply(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        field_owner: &str,
    ) -> Result<(), Error>;

    /// Create; an existing object is `Error::AlreadyExists`
    async fn create(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        field_owner: &str,
    ) -> Result<(), Error>;

    /// Delete by name; a missing object is `Error::NotFound`
    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        name: &str,
    ) -> Result<(), Error>;
}

/// `DynamicClient` over a kube-rs client
#[derive(Clone)]
pub struct KubeDynamicClient {
    client: Client,
}

impl KubeDynamicClient {
    /// Wrap an authenticated client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, mapping: &RestMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &mapping.resource),
            None => Api::all_with(self.client.clone(), &mapping.resource),
        }
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str, Error> {
    obj.metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation_for_field("metadata.name", "object has no name"))
}

#[async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn apply(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        field_owner: &str,
    ) -> Result<(), Error> {
        let name = object_name(obj)?;
        let api = self.api(mapping, namespace.as_deref());
        let params = PatchParams::apply(field_owner).force();
        api.patch(name, &params, &Patch::Apply(obj))
            .await
            .map_err(|e| classify_kube_error(e, &mapping.resource.kind, name))?;
        trace!(kind = %mapping.resource.kind, name = %name, namespace = ?namespace, "applied object");
        Ok(())
    }

    async fn create(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        field_owner: &str,
    ) -> Result<(), Error> {
        let name = object_name(obj)?;
        let api = self.api(mapping, namespace.as_deref());
        let params = PostParams {
            field_manager: Some(field_owner.to_string()),
            ..Default::default()
        };
        api.create(&params, obj)
            .await
            .map_err(|e| classify_kube_error(e, &mapping.resource.kind, name))?;
        trace!(kind = %mapping.resource.kind, name = %name, namespace = ?namespace, "created object");
        Ok(())
    }

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        name: &str,
    ) -> Result<(), Error> {
        let api = self.api(mapping, namespace.as_deref());
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify_kube_error(e, &mapping.resource.kind, name))?;
        trace!(kind = %mapping.resource.kind, name = %name, namespace = ?namespace, "deleted object");
        Ok(())
    }
}
