//! In-memory cluster and store fakes for operator tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::api::DynamicObject;

use manifold_common::crd::{
    ContentSource, InstallSpec, Manifest, ManifestSpec, ManifestStatus, RendererKind,
};
use manifold_common::kube_utils::{kind_of, name_of};
use manifold_common::Error;
use manifold_render::{Applier, DynamicClient, RestMapping, StaticRestMapper};

use crate::store::ManifestStore;

pub const FIELD_OWNER: &str = "manifold.dev/test-operator";

/// Target cluster keyed by `plural/namespace/name`
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<String, DynamicObject>>,
    pub applies: AtomicUsize,
    pub creates: AtomicUsize,
}

fn object_key(mapping: &RestMapping, namespace: Option<&str>, name: &str) -> String {
    format!(
        "{}/{}/{}",
        mapping.resource.plural,
        namespace.unwrap_or_default(),
        name
    )
}

impl FakeCluster {
    pub fn contains(&self, plural: &str, namespace: &str, name: &str) -> bool {
        let key = format!("{plural}/{namespace}/{name}");
        self.objects.lock().unwrap().contains_key(&key)
    }

    pub fn get(&self, plural: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        let key = format!("{plural}/{namespace}/{name}");
        self.objects.lock().unwrap().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl DynamicClient for FakeCluster {
    async fn apply(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        _field_owner: &str,
    ) -> Result<(), Error> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let key = object_key(mapping, namespace.as_deref(), name_of(obj));
        self.objects.lock().unwrap().insert(key, obj.clone());
        Ok(())
    }

    async fn create(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        obj: &DynamicObject,
        _field_owner: &str,
    ) -> Result<(), Error> {
        let key = object_key(mapping, namespace.as_deref(), name_of(obj));
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::already_exists(kind_of(obj), name_of(obj)));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        objects.insert(key, obj.clone());
        Ok(())
    }

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<String>,
        name: &str,
    ) -> Result<(), Error> {
        let key = object_key(mapping, namespace.as_deref(), name);
        match self.objects.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(&mapping.resource.kind, name)),
        }
    }
}

/// Control-plane view keyed by `namespace/name`
#[derive(Default)]
pub struct FakeStore {
    manifests: Mutex<BTreeMap<String, Manifest>>,
    pub statuses: Mutex<Vec<ManifestStatus>>,
}

impl FakeStore {
    pub fn insert(&self, manifest: Manifest) {
        self.manifests
            .lock()
            .unwrap()
            .insert(manifest.cache_key(), manifest);
    }

    pub fn finalizers(&self, key: &str) -> Vec<String> {
        self.manifests
            .lock()
            .unwrap()
            .get(key)
            .and_then(|m| m.metadata.finalizers.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, key: &str) -> Option<Manifest> {
        self.manifests.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ManifestStore for FakeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, Error> {
        Ok(self.snapshot(&format!("{namespace}/{name}")))
    }

    async fn apply_finalizers(
        &self,
        manifest: &Manifest,
        finalizers: Vec<String>,
        _field_owner: &str,
    ) -> Result<(), Error> {
        let key = manifest.cache_key();
        let mut manifests = self.manifests.lock().unwrap();
        let stored = manifests
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("Manifest", &key))?;
        stored.metadata.finalizers = Some(finalizers);
        Ok(())
    }

    async fn update(&self, manifest: &Manifest, _field_owner: &str) -> Result<(), Error> {
        let key = manifest.cache_key();
        let mut manifests = self.manifests.lock().unwrap();
        match manifests.get_mut(&key) {
            Some(stored) => {
                *stored = manifest.clone();
                Ok(())
            }
            None => Err(Error::not_found("Manifest", &key)),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManifestStatus,
        _field_owner: &str,
    ) -> Result<(), Error> {
        self.statuses.lock().unwrap().push(status.clone());
        if let Some(stored) = self
            .manifests
            .lock()
            .unwrap()
            .get_mut(&format!("{namespace}/{name}"))
        {
            stored.status = Some(status.clone());
        }
        Ok(())
    }
}

/// Mapper knowing the kinds used across operator tests
pub fn test_mapper() -> StaticRestMapper {
    StaticRestMapper::new()
        .with("v1", "ConfigMap", "configmaps", true)
        .with("v1", "Service", "services", true)
        .with("v1", "Namespace", "namespaces", false)
        .with("apps/v1", "Deployment", "deployments", true)
        .with("example.dev/v1", "Sample", "samples", true)
}

pub fn applier(cluster: Arc<FakeCluster>, mapper: StaticRestMapper) -> Applier {
    Applier::new(cluster, Arc::new(mapper), FIELD_OWNER)
}

/// Manifest in `default` rendering a local chart at `path`
pub fn manifest(name: &str, path: &str, renderer: RendererKind) -> Manifest {
    let mut m = Manifest::new(
        name,
        ManifestSpec {
            install: InstallSpec {
                name: name.to_string(),
                source: ContentSource::Local {
                    path: path.to_string(),
                },
                renderer,
            },
            values: None,
            target_namespace: Some("apps".to_string()),
            resource: None,
        },
    );
    m.metadata.namespace = Some("default".to_string());
    m.metadata.uid = Some(format!("uid-{name}"));
    m.metadata.generation = Some(1);
    m
}

/// Companion template for a `Sample` named `<name>-default`
pub fn companion_template(name: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "example.dev/v1",
        "kind": "Sample",
        "metadata": {
            "name": format!("{name}-default"),
            "namespace": "default",
        },
        "spec": { "replicas": 1 }
    })
}
