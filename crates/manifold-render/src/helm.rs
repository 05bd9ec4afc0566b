//! Templated chart backend
//!
//! Renders a chart directory with minijinja:
//! - `Chart.yaml` supplies `Chart.Name` and `Chart.Version`
//! - `values.yaml` holds defaults; a remote bundle's install config layer
//!   and then the Manifest values deep-merge over them
//! - `templates/*.yaml|yml` are rendered in file-name order
//! - templates starting with `_` (and `.tpl` files) are partials, reachable
//!   through `{% include %}` but never emitted
//! - undefined variables fail the render

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{context, Environment, ErrorKind, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use manifold_common::crd::ContentSource;
use manifold_common::yaml::read_yaml_file;
use manifold_common::{DesiredState, Error};

use crate::applier::Applier;
use crate::cache::{config_file_path, resolve_source_path};
use crate::source::{RenderResult, RenderSource};

const RENDERER: &str = "helm";
const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";
const TEMPLATES_DIR: &str = "templates";

/// Chart metadata read from `Chart.yaml`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
}

/// Helm-like render source
pub struct HelmRenderSource {
    applier: Arc<Applier>,
    cache_dir: PathBuf,
}

impl HelmRenderSource {
    /// Create a backend resolving remote sources under `cache_dir`
    pub fn new(applier: Arc<Applier>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            applier,
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl RenderSource for HelmRenderSource {
    fn name(&self) -> &'static str {
        RENDERER
    }

    fn applier(&self) -> &Applier {
        &self.applier
    }

    fn get_raw_manifest(&self, desired: &DesiredState) -> RenderResult {
        let chart_dir = match resolve_source_path(&desired.source, &self.cache_dir, RENDERER) {
            Ok(dir) => dir,
            Err(e) => {
                error!(source = %desired.source, error = %e, "resolving chart");
                return RenderResult::failed(String::new(), e);
            }
        };

        let install_config = match load_install_config(&desired.source, &self.cache_dir) {
            Ok(config) => config,
            Err(e) => {
                error!(source = %desired.source, error = %e, "reading install config");
                return RenderResult::failed(String::new(), e);
            }
        };

        match render_chart(&chart_dir, install_config.as_ref(), desired) {
            Ok(manifest) => {
                debug!(
                    chart = %chart_dir.display(),
                    bytes = manifest.len(),
                    "rendered chart"
                );
                RenderResult::ok(manifest)
            }
            Err((partial, e)) => {
                error!(source = %desired.source, error = %e, "rendering chart");
                RenderResult::failed(partial, e)
            }
        }
    }
}

/// Read `Chart.yaml`
pub fn read_chart_metadata(chart_dir: &Path) -> Result<ChartMetadata, Error> {
    let path = chart_dir.join(CHART_FILE);
    if !path.is_file() {
        return Err(Error::render(
            RENDERER,
            format!("{} not found in {}", CHART_FILE, chart_dir.display()),
        ));
    }
    let chart = read_yaml_file(&path).map_err(|e| Error::render(RENDERER, e.to_string()))?;
    let field = |key: &str| -> Result<String, Error> {
        match chart.get(key) {
            Some(JsonValue::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(JsonValue::Number(n)) => Ok(n.to_string()),
            _ => Err(Error::render(
                RENDERER,
                format!("{} has no {}", path.display(), key),
            )),
        }
    };
    Ok(ChartMetadata {
        name: field("name")?,
        version: field("version")?,
    })
}

/// Values from the cached install config layer of a remote bundle
fn load_install_config(source: &ContentSource, cache_dir: &Path) -> Result<Option<JsonValue>, Error> {
    let ContentSource::Remote { reference, .. } = source else {
        return Ok(None);
    };
    let path = config_file_path(cache_dir, reference).map_err(|e| Error::render(RENDERER, e.to_string()))?;
    if !path.is_file() {
        return Ok(None);
    }
    match read_yaml_file(&path).map_err(|e| Error::render(RENDERER, e.to_string()))? {
        JsonValue::Null => Ok(None),
        config @ JsonValue::Object(_) => Ok(Some(config)),
        _ => Err(Error::render(
            RENDERER,
            format!("{} must contain a mapping", path.display()),
        )),
    }
}

/// Deep-merge `overrides` into `base`; maps merge key by key, anything else
/// replaces
pub fn merge_values(base: &mut JsonValue, overrides: &JsonValue) {
    match (base, overrides) {
        (JsonValue::Object(base), JsonValue::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, JsonValue::Null) => {}
        (base, overrides) => *base = overrides.clone(),
    }
}

/// Render every template; on failure returns the text produced so far
fn render_chart(
    chart_dir: &Path,
    install_config: Option<&JsonValue>,
    desired: &DesiredState,
) -> Result<String, (String, Error)> {
    let chart = read_chart_metadata(chart_dir).map_err(|e| (String::new(), e))?;

    let mut values = match chart_dir.join(VALUES_FILE) {
        path if path.is_file() => {
            read_yaml_file(&path).map_err(|e| (String::new(), Error::render(RENDERER, e.to_string())))?
        }
        _ => JsonValue::Object(Default::default()),
    };
    if values.is_null() {
        values = JsonValue::Object(Default::default());
    }
    if let Some(config) = install_config {
        merge_values(&mut values, config);
    }
    merge_values(&mut values, &desired.values);

    let templates = load_templates(&chart_dir.join(TEMPLATES_DIR)).map_err(|e| (String::new(), e))?;
    let env = build_environment(&templates).map_err(|e| (String::new(), e))?;

    let ctx = context! {
        Values => Value::from_serialize(&values),
        Release => context! {
            Name => desired.release_name.clone(),
            Namespace => desired.default_namespace(),
        },
        Chart => context! {
            Name => chart.name.clone(),
            Version => chart.version.clone(),
        },
    };

    let mut out = String::new();
    for (name, _) in templates.iter().filter(|(name, _)| is_emitted(name)) {
        let rendered = env
            .get_template(name)
            .and_then(|t| t.render(&ctx))
            .map_err(|e| {
                (
                    out.clone(),
                    Error::render(RENDERER, format!("{}/{}/{}: {:#}", chart.name, TEMPLATES_DIR, name, e)),
                )
            })?;

        let body = rendered.trim();
        if body.is_empty() {
            continue;
        }
        out.push_str("---\n");
        out.push_str(&format!("# Source: {}/{}/{}\n", chart.name, TEMPLATES_DIR, name));
        out.push_str(body);
        out.push('\n');
    }
    Ok(out)
}

fn is_emitted(name: &str) -> bool {
    !name.starts_with('_') && (name.ends_with(".yaml") || name.ends_with(".yml"))
}

fn is_template(name: &str) -> bool {
    name.ends_with(".yaml") || name.ends_with(".yml") || name.ends_with(".tpl")
}

/// Template files of a chart, sorted by file name
fn load_templates(dir: &Path) -> Result<Vec<(String, String)>, Error> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::render(RENDERER, format!("reading {}: {}", dir.display(), e)))?;

    let mut templates = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::render(RENDERER, format!("reading {}: {}", dir.display(), e)))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        if !path.is_file() || !is_template(&name) {
            continue;
        }
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::render(RENDERER, format!("reading {}: {}", path.display(), e)))?;
        templates.push((name, source));
    }
    templates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(templates)
}

fn build_environment(templates: &[(String, String)]) -> Result<Environment<'static>, Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_filter("quote", quote);
    env.add_filter("required", required);
    env.add_filter("toyaml", to_yaml);

    for (name, source) in templates {
        env.add_template_owned(name.clone(), source.clone())
            .map_err(|e| Error::render(RENDERER, format!("{}: {:#}", name, e)))?;
    }
    Ok(env)
}

/// Quote filter - wraps the value in double quotes, escaping as JSON does
///
/// Usage: `{{ Values.tag | quote }}`
fn quote(value: Value) -> String {
    let text = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    serde_json::Value::String(text).to_string()
}

/// Required filter - fails with `message` if the value is undefined or none
///
/// Usage: `{{ Values.image | required("image is required") }}`
fn required(value: Value, message: Option<String>) -> Result<Value, minijinja::Error> {
    if value.is_undefined() || value.is_none() {
        Err(minijinja::Error::new(
            ErrorKind::UndefinedError,
            message.unwrap_or_else(|| "required value is undefined".to_string()),
        ))
    } else {
        Ok(value)
    }
}

/// YAML filter - serializes a value as a YAML fragment
///
/// Usage: `{{ Values.labels | toyaml }}`
fn to_yaml(value: Value) -> Result<String, minijinja::Error> {
    serde_yaml::to_string(&value)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}
