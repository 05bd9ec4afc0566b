//! Overlay backend
//!
//! A native build of the kustomization subset manifold bundles use:
//! `resources` (files or nested kustomization directories), `namespace`,
//! `namePrefix`, `nameSuffix`, `commonLabels` and `commonAnnotations`.
//! Remote resources are rejected; content must already be on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error};

use manifold_common::yaml::{parse_yaml_multi, read_yaml_file};
use manifold_common::{DesiredState, Error};

use crate::applier::Applier;
use crate::cache::resolve_source_path;
use crate::source::{RenderResult, RenderSource};
use crate::transform::is_cluster_scoped_kind;

const RENDERER: &str = "kustomize";
const KUSTOMIZATION_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Kinds whose names are never prefixed or suffixed
const NAME_EXEMPT_KINDS: &[&str] = &["Namespace", "CustomResourceDefinition"];

/// Overlay-backed render source
pub struct KustomizeRenderSource {
    applier: Arc<Applier>,
    cache_dir: PathBuf,
}

impl KustomizeRenderSource {
    /// Create a backend resolving remote sources under `cache_dir`
    pub fn new(applier: Arc<Applier>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl RenderSource for KustomizeRenderSource {
    fn name(&self) -> &'static str {
        RENDERER
    }

    fn applier(&self) -> &Applier {
        &self.applier
    }

    fn get_raw_manifest(&self, desired: &DesiredState) -> RenderResult {
        let result = resolve_source_path(&desired.source, &self.cache_dir, RENDERER)
            .and_then(|dir| build(&dir))
            .and_then(|objects| to_multi_doc(&objects));

        match result {
            Ok(manifest) => {
                debug!(source = %desired.source, bytes = manifest.len(), "built overlay");
                RenderResult::ok(manifest)
            }
            Err(e) => {
                error!(source = %desired.source, error = %e, "running kustomize to create final manifest");
                RenderResult::failed(String::new(), e)
            }
        }
    }
}

/// Build the overlay rooted at `dir` into a list of objects
pub fn build(dir: &Path) -> Result<Vec<Value>, Error> {
    let mut visiting = HashSet::new();
    build_dir(dir, &mut visiting)
}

fn build_dir(dir: &Path, visiting: &mut HashSet<PathBuf>) -> Result<Vec<Value>, Error> {
    let canonical = dir
        .canonicalize()
        .map_err(|e| Error::render(RENDERER, format!("resolving {}: {}", dir.display(), e)))?;
    if !visiting.insert(canonical.clone()) {
        return Err(Error::render(
            RENDERER,
            format!("cycle detected at {}", dir.display()),
        ));
    }

    let kustomization = read_kustomization(dir)?;
    let mut objects = Vec::new();

    for entry in string_list(&kustomization, "resources")? {
        if entry.contains("://") || entry.starts_with("github.com/") {
            return Err(Error::render(
                RENDERER,
                format!("remote resource {entry} is not supported"),
            ));
        }
        let path = dir.join(&entry);
        if path.is_dir() {
            objects.extend(build_dir(&path, visiting)?);
        } else if path.is_file() {
            objects.extend(read_resource_file(&path)?);
        } else {
            return Err(Error::render(
                RENDERER,
                format!("resource {} not found in {}", entry, dir.display()),
            ));
        }
    }

    apply_kustomization(&kustomization, &mut objects)?;
    visiting.remove(&canonical);
    Ok(objects)
}

fn read_kustomization(dir: &Path) -> Result<Value, Error> {
    let path = KUSTOMIZATION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            Error::render(
                RENDERER,
                format!("no kustomization file in {}", dir.display()),
            )
        })?;
    match read_yaml_file(&path).map_err(|e| Error::render(RENDERER, e.to_string()))? {
        Value::Null => Ok(Value::Object(Map::new())),
        value @ Value::Object(_) => Ok(value),
        _ => Err(Error::render(
            RENDERER,
            format!("{} is not a mapping", path.display()),
        )),
    }
}

fn read_resource_file(path: &Path) -> Result<Vec<Value>, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::render(RENDERER, format!("reading {}: {}", path.display(), e)))?;
    let docs = parse_yaml_multi(&content)
        .map_err(|e| Error::render(RENDERER, format!("{}: {}", path.display(), e)))?;
    Ok(docs
        .into_iter()
        .filter(|doc| doc.as_object().is_some_and(|m| !m.is_empty()))
        .collect())
}

fn string_list(kustomization: &Value, key: &str) -> Result<Vec<String>, Error> {
    match kustomization.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    Error::render(RENDERER, format!("{key} entries must be strings"))
                })
            })
            .collect(),
        Some(_) => Err(Error::render(RENDERER, format!("{key} must be a list"))),
    }
}

fn string_map(kustomization: &Value, key: &str) -> Result<Map<String, Value>, Error> {
    match kustomization.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                };
                (k.clone(), v)
            })
            .collect()),
        Some(_) => Err(Error::render(RENDERER, format!("{key} must be a mapping"))),
    }
}

fn apply_kustomization(kustomization: &Value, objects: &mut [Value]) -> Result<(), Error> {
    let namespace = kustomization.get("namespace").and_then(Value::as_str);
    let prefix = kustomization
        .get("namePrefix")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let suffix = kustomization
        .get("nameSuffix")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let labels = string_map(kustomization, "commonLabels")?;
    let annotations = string_map(kustomization, "commonAnnotations")?;

    for obj in objects.iter_mut() {
        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(metadata) = obj
            .as_object_mut()
            .map(|o| o.entry("metadata").or_insert_with(|| Value::Object(Map::new())))
            .and_then(Value::as_object_mut)
        else {
            continue;
        };

        if let Some(ns) = namespace.filter(|_| !is_cluster_scoped_kind(&kind)) {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }

        if !NAME_EXEMPT_KINDS.contains(&kind.as_str()) && !(prefix.is_empty() && suffix.is_empty()) {
            if let Some(name) = metadata.get("name").and_then(Value::as_str) {
                let renamed = format!("{prefix}{name}{suffix}");
                metadata.insert("name".to_string(), Value::String(renamed));
            }
        }

        merge_string_map(metadata, "labels", &labels);
        merge_string_map(metadata, "annotations", &annotations);
    }
    Ok(())
}

fn merge_string_map(metadata: &mut Map<String, Value>, key: &str, entries: &Map<String, Value>) {
    if entries.is_empty() {
        return;
    }
    let target = metadata
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Some(map) = target.as_object_mut() {
        for (k, v) in entries {
            map.insert(k.clone(), v.clone());
        }
    }
}

fn to_multi_doc(objects: &[Value]) -> Result<String, Error> {
    let mut out = String::new();
    for obj in objects {
        let doc = serde_yaml::to_string(obj)
            .map_err(|e| Error::render(RENDERER, format!("converting output to yaml: {e}")))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{clean_file_path_join, write_to_file};
    use crate::client::MockDynamicClient;
    use crate::mapper::StaticRestMapper;
    use manifold_common::crd::{ContentSource, RendererKind};
    use manifold_common::parse::parse_manifest_str;
    use manifold_common::BaseResource;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = clean_file_path_join(root, rel).unwrap();
        write_to_file(&path, contents.as_bytes()).unwrap();
    }

    fn overlay(root: &Path) {
        write(
            root,
            "base/kustomization.yaml",
            "resources:\n  - namespace.yaml\n  - config.yaml\ncommonLabels:\n  app: sample\n",
        );
        write(
            root,
            "base/namespace.yaml",
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: sample-system\n",
        );
        write(
            root,
            "base/config.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  level: info\n---\napiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: reader\nrules: []\n",
        );
        write(
            root,
            "overlay/kustomization.yaml",
            "resources:\n  - ../base\nnamespace: sample-system\nnamePrefix: prod-\ncommonAnnotations:\n  team: platform\n",
        );
    }

    fn desired(path: &Path) -> DesiredState {
        DesiredState {
            release_name: "sample".to_string(),
            source: ContentSource::Local {
                path: path.display().to_string(),
            },
            renderer: RendererKind::Kustomize,
            target_namespace: None,
            values: Value::Null,
            owner: BaseResource {
                api_version: "operator.manifold.dev/v1alpha1".to_string(),
                kind: "Manifest".to_string(),
                name: "sample".to_string(),
                namespace: "kcp-system".to_string(),
                uid: None,
            },
        }
    }

    fn source(cache_dir: &Path) -> KustomizeRenderSource {
        let applier = Applier::new(
            Arc::new(MockDynamicClient::new()),
            Arc::new(StaticRestMapper::new()),
            "owner",
        );
        KustomizeRenderSource::new(Arc::new(applier), cache_dir)
    }

    #[test]
    fn test_overlay_build() {
        let dir = tempfile::tempdir().unwrap();
        overlay(dir.path());

        let manifest = source(dir.path())
            .get_raw_manifest(&desired(&dir.path().join("overlay")))
            .into_result()
            .unwrap();
        let parsed = parse_manifest_str(&manifest).unwrap();
        assert!(parsed.blobs.is_empty());
        assert_eq!(parsed.resources.len(), 3);

        let ns = &parsed.resources[0];
        assert_eq!(ns.metadata.name.as_deref(), Some("sample-system"));
        assert_eq!(ns.metadata.namespace, None);

        let cm = &parsed.resources[1];
        assert_eq!(cm.metadata.name.as_deref(), Some("prod-settings"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("sample-system"));
        assert_eq!(cm.metadata.labels.as_ref().unwrap()["app"], "sample");
        assert_eq!(cm.metadata.annotations.as_ref().unwrap()["team"], "platform");
        assert_eq!(cm.data["data"]["level"], "info");

        let role = &parsed.resources[2];
        assert_eq!(role.metadata.name.as_deref(), Some("prod-reader"));
        assert_eq!(role.metadata.namespace, None);
    }

    #[test]
    fn test_cycles_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/kustomization.yaml", "resources:\n  - ../b\n");
        write(dir.path(), "b/kustomization.yaml", "resources:\n  - ../a\n");
        let err = build(&dir.path().join("a")).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn test_shared_base_is_not_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base/kustomization.yaml",
            "resources:\n  - cm.yaml\n",
        );
        write(
            dir.path(),
            "base/cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
        );
        write(dir.path(), "x/kustomization.yaml", "resources:\n  - ../base\nnameSuffix: -x\n");
        write(dir.path(), "y/kustomization.yaml", "resources:\n  - ../base\nnameSuffix: -y\n");
        write(dir.path(), "top/kustomization.yaml", "resources:\n  - ../x\n  - ../y\n");

        let objects = build(&dir.path().join("top")).unwrap();
        let names: Vec<_> = objects
            .iter()
            .map(|o| o["metadata"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["cm-x", "cm-y"]);
    }

    #[test]
    fn test_remote_resources_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "kustomization.yaml",
            "resources:\n  - https://example.com/manifests.yaml\n",
        );
        let result = source(dir.path()).get_raw_manifest(&desired(dir.path()));
        let err = result.into_result().unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_missing_kustomization_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = build(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no kustomization file"));
    }
}
