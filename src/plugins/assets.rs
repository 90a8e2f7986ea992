//! Frontend asset registration and serving
//!
//! A plugin's frontend is exposed at three public locations:
//!
//! - `/plugins-assets/{entry}` serves the static assets directory
//! - `/plugins/{entry}/remoteEntry.js` serves the module federation entry
//! - `/plugins/{entry}/manifest.json` serves the manifest itself
//!
//! Mounts are tagged with the owning plugin and removed on unload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tokio::sync::RwLock;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use super::discovery::resolve_within;
use super::manifest::{MANIFEST_FILE, PluginManifest};
use super::routing::{longest_match, strip_uri_prefix};
use crate::{Error, Result};

/// Public prefix for plugin asset directories
pub const ASSETS_BASE: &str = "/plugins-assets";

/// Public prefix for per-plugin frontend files
pub const FRONTEND_BASE: &str = "/plugins";

/// Module federation entry file name
pub const REMOTE_ENTRY_FILE: &str = "remoteEntry.js";

/// What a mount point serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetTarget {
    /// Directory tree, matched by prefix
    Dir(PathBuf),
    /// Single file, matched exactly
    File(PathBuf),
}

#[derive(Debug)]
struct AssetMount {
    owner: String,
    target: AssetTarget,
}

/// Public path → plugin asset bindings
#[derive(Debug, Default)]
pub struct AssetMounts {
    mounts: RwLock<HashMap<String, AssetMount>>,
}

impl AssetMounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `path` to `target` on behalf of plugin `owner`
    ///
    /// Re-mounting a path the same owner already holds replaces it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if another plugin owns the path, which
    /// happens when two plugins share a frontend entry
    pub async fn mount(&self, owner: &str, path: &str, target: AssetTarget) -> Result<()> {
        let mut mounts = self.mounts.write().await;

        if let Some(existing) = mounts.get(path)
            && existing.owner != owner
        {
            return Err(Error::Validation(format!(
                "asset path {path} is already mounted by plugin {}",
                existing.owner
            )));
        }

        mounts.insert(
            path.to_string(),
            AssetMount {
                owner: owner.to_string(),
                target,
            },
        );
        tracing::info!(plugin_id = %owner, path = %path, "frontend asset mounted");
        Ok(())
    }

    /// Remove every mount owned by `owner`, returning how many were removed
    pub async fn unmount_owner(&self, owner: &str) -> usize {
        let mut mounts = self.mounts.write().await;
        let before = mounts.len();
        mounts.retain(|_, mount| mount.owner != owner);
        before - mounts.len()
    }

    /// Mounted paths, sorted
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.mounts.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Serve `req` from a matching mount
    ///
    /// File mounts match their exact path; directory mounts match by prefix.
    ///
    /// # Errors
    ///
    /// Returns the untouched request when no mount matches
    pub async fn dispatch(&self, mut req: Request) -> std::result::Result<Response, Request> {
        let matched = {
            let mounts = self.mounts.read().await;
            let path = req.uri().path();

            if let Some(AssetMount {
                target: AssetTarget::File(file),
                ..
            }) = mounts.get(path)
            {
                Some((String::new(), AssetTarget::File(file.clone())))
            } else {
                let dirs = mounts
                    .iter()
                    .filter(|(_, m)| matches!(m.target, AssetTarget::Dir(_)))
                    .map(|(p, _)| p.as_str());
                longest_match(path, dirs).and_then(|prefix| {
                    mounts
                        .get(prefix)
                        .map(|m| (prefix.to_string(), m.target.clone()))
                })
            }
        };

        match matched {
            Some((_, AssetTarget::File(file))) => {
                let Ok(response) = ServeFile::new(file).oneshot(req).await;
                Ok(response.into_response())
            }
            Some((prefix, AssetTarget::Dir(dir))) => {
                let Some(uri) = strip_uri_prefix(req.uri(), &prefix) else {
                    return Err(req);
                };
                *req.uri_mut() = uri;
                let Ok(response) = ServeDir::new(dir).oneshot(req).await;
                Ok(response.into_response())
            }
            None => Err(req),
        }
    }
}

/// Work out the asset mounts of a plugin's frontend section
///
/// Declared locations that are missing on disk, or point outside the plugin
/// root, are skipped with an info log. The manifest is only published for
/// plugins that declare a frontend. Performs blocking filesystem checks.
#[must_use]
pub fn plan_frontend_assets(root: &Path, manifest: &PluginManifest) -> Vec<(String, AssetTarget)> {
    let Some(frontend) = &manifest.frontend else {
        return Vec::new();
    };

    let id = &manifest.id;
    let entry = manifest.frontend_entry();
    let mut planned = Vec::new();

    if let Some(assets_dir) = frontend.assets_dir.as_deref() {
        match resolve_within(root, assets_dir).filter(|dir| dir.is_dir()) {
            Some(dir) => planned.push((format!("{ASSETS_BASE}/{entry}"), AssetTarget::Dir(dir))),
            None => {
                tracing::info!(plugin_id = %id, assets_dir = %assets_dir, "assets directory not found, skipping");
            }
        }
    }

    let remote_entry = frontend
        .module_federation
        .as_ref()
        .and_then(|mf| mf.remote_entry.as_deref());
    if let Some(remote_entry) = remote_entry {
        match resolve_within(root, remote_entry).filter(|file| file.is_file()) {
            Some(file) => planned.push((
                format!("{FRONTEND_BASE}/{entry}/{REMOTE_ENTRY_FILE}"),
                AssetTarget::File(file),
            )),
            None => {
                tracing::info!(plugin_id = %id, remote_entry = %remote_entry, "remote entry not found, skipping");
            }
        }
    }

    let manifest_file = root.join(MANIFEST_FILE);
    if manifest_file.is_file() {
        planned.push((
            format!("{FRONTEND_BASE}/{entry}/{MANIFEST_FILE}"),
            AssetTarget::File(manifest_file),
        ));
    }

    planned
}
