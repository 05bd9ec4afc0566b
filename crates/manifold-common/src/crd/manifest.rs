//! Manifest CRD types
//!
//! A `Manifest` names a templated resource bundle, the backend that renders it,
//! value overrides, and an optional companion resource template whose lifecycle
//! is bound to the Manifest through a finalizer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Source and renderer
// =============================================================================

/// Where the bundle content lives
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentSource {
    /// Chart or overlay directory on the local filesystem
    Local {
        /// Directory path
        path: String,
    },
    /// Content published to a registry and materialized into the local cache
    #[serde(rename_all = "camelCase")]
    Remote {
        /// Repository the content was published to
        repository: String,
        /// Content name, used as the cache directory prefix
        name: String,
        /// Tag or digest
        reference: String,
    },
}

// A structural CRD schema cannot hold one `type` property per variant, so both
// variants share a single flat object schema. Per-variant fields are enforced
// on deserialization.
impl JsonSchema for ContentSource {
    fn schema_name() -> String {
        "ContentSource".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        use schemars::schema::{InstanceType, Metadata, ObjectValidation, Schema, SchemaObject};

        let string = |description: &str| SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            metadata: Some(Box::new(Metadata {
                description: Some(description.to_string()),
                ..Default::default()
            })),
            ..Default::default()
        };

        let source_type = SchemaObject {
            enum_values: Some(vec!["local".into(), "remote".into()]),
            ..string("Source type: 'local' or 'remote'")
        };

        let mut properties = schemars::Map::new();
        properties.insert("type".to_string(), source_type.into());
        properties.insert("path".to_string(), string("Directory path (local)").into());
        properties.insert(
            "repository".to_string(),
            string("Repository the content was published to (remote)").into(),
        );
        properties.insert("name".to_string(), string("Content name (remote)").into());
        properties.insert("reference".to_string(), string("Tag or digest (remote)").into());

        Schema::Object(SchemaObject {
            instance_type: Some(InstanceType::Object.into()),
            object: Some(Box::new(ObjectValidation {
                properties,
                required: ["type".to_string()].into_iter().collect(),
                ..Default::default()
            })),
            ..Default::default()
        })
    }
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { path } => write!(f, "local:{}", path),
            Self::Remote {
                repository,
                name,
                reference,
            } => write!(f, "{}/{}@{}", repository, name, reference),
        }
    }
}

/// Rendering backend for a bundle
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Templated chart (Chart.yaml, values.yaml, templates/)
    #[default]
    Helm,
    /// Overlay directory (kustomization.yaml)
    Kustomize,
}

impl std::fmt::Display for RendererKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Helm => write!(f, "helm"),
            Self::Kustomize => write!(f, "kustomize"),
        }
    }
}

impl std::str::FromStr for RendererKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "helm" => Ok(Self::Helm),
            "kustomize" => Ok(Self::Kustomize),
            _ => Err(crate::Error::validation_for_field(
                "spec.install.renderer",
                format!("invalid renderer: {s}, expected one of: helm, kustomize"),
            )),
        }
    }
}

/// What to install and how to render it
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallSpec {
    /// Release name; templates see it as `Release.Name`
    pub name: String,
    /// Content locator
    pub source: ContentSource,
    /// Rendering backend
    #[serde(default)]
    pub renderer: RendererKind,
}

// =============================================================================
// CRD
// =============================================================================

/// Declarative bundle reconciled into a target cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.manifold.dev",
    version = "v1alpha1",
    kind = "Manifest",
    plural = "manifests",
    shortname = "mf",
    namespaced,
    status = "ManifestStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpec {
    /// Bundle to render and apply
    pub install: InstallSpec,

    /// Value overrides merged over the bundle defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,

    /// Default namespace for namespaced objects that do not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Companion resource created after install and removed before deletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resource: Option<serde_json::Value>,
}

fn preserve_unknown_fields(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut extensions = schemars::Map::new();
    extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions,
        ..Default::default()
    })
}

impl Manifest {
    /// Embedded companion resource template, if it carries any content
    pub fn companion_template(&self) -> Option<&serde_json::Value> {
        self.spec
            .resource
            .as_ref()
            .filter(|r| r.as_object().is_some_and(|o| !o.is_empty()))
    }

    /// `namespace/name` key used for caches and logs
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    /// True once deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

// =============================================================================
// Status
// =============================================================================

/// Reconciliation state of a Manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ManifestState {
    /// Rendering or applying is in progress
    #[default]
    Processing,
    /// Live state matches the rendered bundle
    Ready,
    /// The last pass failed
    Error,
    /// Uninstall is in progress
    Deleting,
}

impl std::fmt::Display for ManifestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Observed state of a Manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    /// Current state
    #[serde(default)]
    pub state: ManifestState,
    /// Content hash of the last successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_hash: Option<u32>,
    /// Human readable detail for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
