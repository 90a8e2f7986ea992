//! Plugin discovery - locate plugin directories and read their manifests

use std::path::{Component, Path, PathBuf};

use super::manifest::{MANIFEST_FILE, PluginManifest, is_valid_id, validate_manifest};
use crate::{Error, Result};

/// Resolve the directory of plugin `id` under `root`
///
/// The id is checked against the slug rule before touching the filesystem,
/// so it can never escape the plugins root.
///
/// # Errors
///
/// Returns `Error::NotFound` if the id is not a slug or the directory does
/// not exist
pub fn plugin_dir(root: &Path, id: &str) -> Result<PathBuf> {
    if !is_valid_id(id) {
        return Err(Error::NotFound(format!("plugin {id:?}")));
    }

    let dir = root.join(id);
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("plugin directory {}", dir.display())));
    }

    Ok(dir)
}

/// Join a manifest-relative path onto a plugin root
///
/// Returns `None` for absolute paths and paths containing `..`.
#[must_use]
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if relative.as_os_str().is_empty() || !contained {
        return None;
    }

    Some(root.join(relative))
}

/// Read and validate the manifest of the plugin in `dir`
///
/// The manifest id must equal the directory name.
///
/// # Errors
///
/// Returns `Error::Validation` if the manifest is missing, malformed, or
/// names a different plugin
pub fn read_manifest(dir: &Path) -> Result<PluginManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::Validation(format!(
                "missing {MANIFEST_FILE} in {}",
                dir.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let manifest = validate_manifest(&raw)?;

    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if manifest.id != dir_name {
        return Err(Error::Validation(format!(
            "manifest id {:?} does not match directory {dir_name:?}",
            manifest.id
        )));
    }

    Ok(manifest)
}

/// Scan the plugins root for plugin directories
///
/// Returns `(directory, manifest result)` for every immediate subdirectory,
/// sorted by directory name, so invalid plugins are reported rather than
/// silently dropped.
#[must_use]
pub fn discover_plugins(root: &Path) -> Vec<(PathBuf, Result<PluginManifest>)> {
    if !root.is_dir() {
        tracing::debug!(path = %root.display(), "plugins directory does not exist, skipping");
        return Vec::new();
    }

    let Ok(entries) = std::fs::read_dir(root) else {
        tracing::warn!(path = %root.display(), "failed to read plugins directory");
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    dirs.into_iter()
        .map(|dir| {
            let manifest = read_manifest(&dir);
            if let Err(e) = &manifest {
                tracing::warn!(path = %dir.display(), error = %e, "invalid plugin");
            }
            (dir, manifest)
        })
        .collect()
}
