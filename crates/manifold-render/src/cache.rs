//! On-disk content cache layout
//!
//! Remote bundles are materialized under `<cache_dir>/<name>-<reference>`,
//! with an optional install config layer at
//! `<cache_dir>/configs/<reference>/installConfig.yaml`.
//! The cache is disposable: deleting it only forces content to be fetched
//! again, it never loses state.

use std::path::{Component, Path, PathBuf};

use manifold_common::crd::ContentSource;
use manifold_common::Error;

const CONFIGS_DIR: &str = "configs";
const CONFIG_FILE: &str = "installConfig.yaml";

fn sanitize_reference(reference: &str) -> String {
    reference.replace([':', '/'], "-")
}

/// Directory a remote bundle is materialized into.
///
/// Fails when `name` or `reference` would lead outside `cache_dir`.
pub fn chart_cache_path(cache_dir: &Path, name: &str, reference: &str) -> Result<PathBuf, Error> {
    clean_file_path_join(
        cache_dir,
        &format!("{name}-{}", sanitize_reference(reference)),
    )
}

/// Install config layer published alongside a remote bundle
pub fn config_file_path(cache_dir: &Path, reference: &str) -> Result<PathBuf, Error> {
    clean_file_path_join(
        cache_dir,
        &format!("{CONFIGS_DIR}/{}/{CONFIG_FILE}", sanitize_reference(reference)),
    )
}

/// Local directory holding the content of a source.
///
/// Fails with a render error when the directory does not exist.
pub fn resolve_source_path(
    source: &ContentSource,
    cache_dir: &Path,
    renderer: &str,
) -> Result<PathBuf, Error> {
    let path = match source {
        ContentSource::Local { path } => PathBuf::from(path),
        ContentSource::Remote {
            name, reference, ..
        } => chart_cache_path(cache_dir, name, reference)
            .map_err(|e| Error::render(renderer, format!("invalid cache path for {source}: {e}")))?,
    };
    if !path.is_dir() {
        return Err(Error::render(
            renderer,
            format!("content for {} not found at {}", source, path.display()),
        ));
    }
    Ok(path)
}

/// Join a relative path onto `root`, refusing anything that could escape it:
/// absolute paths, `..` components and `:` (drive prefixes).
pub fn clean_file_path_join(root: &Path, dest: &str) -> Result<PathBuf, Error> {
    if dest.contains(':') {
        return Err(Error::validation(format!(
            "path {dest} contains ':' and is not allowed"
        )));
    }

    let dest_path = Path::new(dest);
    let mut clean = PathBuf::new();
    for component in dest_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::validation(format!(
                    "path {dest} contains '..' and is not allowed"
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::validation(format!(
                    "path {dest} is absolute and is not allowed"
                )))
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(Error::validation("empty path is not allowed"));
    }
    Ok(root.join(clean))
}

/// Write `contents` to `path`, creating parent directories
#[cfg(test)]
pub(crate) fn write_to_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
