//! Live routing table for plugin HTTP handlers
//!
//! axum routers are immutable once served, so plugin handlers are not merged
//! into the host router. The host's fallback forwards requests here and the
//! table picks the plugin router mounted at the longest matching prefix.
//! Unmounting removes the binding, so an unloaded plugin stops answering
//! immediately.

use std::collections::HashMap;

use axum::Router;
use axum::extract::Request;
use axum::http::Uri;
use axum::response::Response;
use tokio::sync::RwLock;
use tower::ServiceExt;

use crate::{Error, Result};

/// Outcome of routing a request through the table
pub enum Dispatch {
    /// A mounted plugin answered
    Served(Response),
    /// The prefix is mounted but its owning plugin was not admitted
    Refused(String),
    /// No mount matches; the request is handed back untouched
    Unmatched(Request),
}

struct RouteMount {
    owner: String,
    router: Router,
}

/// Prefix → plugin router bindings
#[derive(Default)]
pub struct RouteTable {
    mounts: RwLock<HashMap<String, RouteMount>>,
}

impl RouteTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `router` at `prefix` on behalf of plugin `owner`
    ///
    /// Re-mounting a prefix the same owner already holds replaces it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if another plugin owns the prefix
    pub async fn mount(&self, owner: &str, prefix: &str, router: Router) -> Result<()> {
        let mut mounts = self.mounts.write().await;

        if let Some(existing) = mounts.get(prefix)
            && existing.owner != owner
        {
            return Err(Error::Validation(format!(
                "api prefix {prefix} is already mounted by plugin {}",
                existing.owner
            )));
        }

        mounts.insert(
            prefix.to_string(),
            RouteMount {
                owner: owner.to_string(),
                router,
            },
        );
        tracing::info!(plugin_id = %owner, prefix = %prefix, "plugin routes mounted");
        Ok(())
    }

    /// Remove every binding owned by `owner`, returning how many were removed
    pub async fn unmount_owner(&self, owner: &str) -> usize {
        let mut mounts = self.mounts.write().await;
        let before = mounts.len();
        mounts.retain(|_, mount| mount.owner != owner);
        let removed = before - mounts.len();

        if removed > 0 {
            tracing::info!(plugin_id = %owner, removed, "plugin routes unmounted");
        }
        removed
    }

    /// Currently mounted prefixes, sorted
    pub async fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.mounts.read().await.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }

    /// Forward `req` to the plugin mounted at the longest matching prefix
    ///
    /// `admit` is asked with the owning plugin id before any plugin code
    /// runs. The prefix is stripped before forwarding.
    pub async fn dispatch(&self, mut req: Request, admit: impl Fn(&str) -> bool) -> Dispatch {
        let matched = {
            let mounts = self.mounts.read().await;
            longest_match(req.uri().path(), mounts.keys().map(String::as_str)).and_then(|prefix| {
                mounts.get(prefix).map(|mount| {
                    (prefix.to_string(), mount.owner.clone(), mount.router.clone())
                })
            })
        };

        let Some((prefix, owner, router)) = matched else {
            return Dispatch::Unmatched(req);
        };
        if !admit(&owner) {
            tracing::debug!(plugin_id = %owner, prefix = %prefix, "plugin route refused");
            return Dispatch::Refused(owner);
        }
        let Some(uri) = strip_uri_prefix(req.uri(), &prefix) else {
            return Dispatch::Unmatched(req);
        };

        *req.uri_mut() = uri;
        let Ok(response) = router.oneshot(req).await;
        Dispatch::Served(response)
    }
}

/// Path remainder below `prefix`, if `path` lies on or under it
pub(crate) fn remainder<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Longest prefix among `prefixes` that `path` lies under
pub(crate) fn longest_match<'p>(
    path: &str,
    prefixes: impl Iterator<Item = &'p str>,
) -> Option<&'p str> {
    prefixes
        .filter(|prefix| remainder(path, prefix).is_some())
        .max_by_key(|prefix| prefix.len())
}

/// Rewrite `uri` to its path below `prefix`, keeping the query
pub(crate) fn strip_uri_prefix(uri: &Uri, prefix: &str) -> Option<Uri> {
    let rest = remainder(uri.path(), prefix)?;
    let path_and_query = match uri.query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };
    path_and_query.parse().ok()
}
