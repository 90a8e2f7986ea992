//! Backend module loading
//!
//! Plugin backends are compiled into the host and registered in a
//! [`BackendCatalog`] under their plugin id. Loading checks the manifest's
//! entry file, instantiates the unit through its factory and inspects which
//! HTTP surface it exposes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::Router;
use axum::routing::MethodRouter;

use super::discovery::resolve_within;
use super::manifest::BackendSection;
use crate::{Error, Result};

/// A named handler exported by a backend unit
pub struct PluginRoute {
    pub name: String,
    /// Path relative to the plugin's mount point, starting with `/`
    pub path: String,
    pub handler: MethodRouter,
}

impl PluginRoute {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            handler,
        }
    }
}

/// An instantiated plugin backend
///
/// A unit exposes either a complete sub-application or a list of routes.
/// Units exposing neither still load, without an HTTP surface.
#[async_trait]
pub trait BackendModule: Send + Sync {
    /// Self-contained router mounted whole at the plugin's prefix
    fn sub_application(&self) -> Option<Router> {
        None
    }

    /// Routes merged into a fresh router mounted at the plugin's prefix
    fn routes(&self) -> Option<Vec<PluginRoute>> {
        None
    }

    /// Release resources before the unit is dropped
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails; unloading proceeds regardless
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// What a backend unit is instantiated with
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub plugin_id: String,
    /// Plugin directory
    pub root: PathBuf,
    /// Resolved entry file
    pub entry: PathBuf,
    /// Full mount point of the plugin's handlers
    pub api_prefix: String,
}

/// Constructor of a backend unit
pub type BackendFactory =
    Arc<dyn Fn(&BackendContext) -> Result<Arc<dyn BackendModule>> + Send + Sync>;

/// Backend factories known to the host, keyed by plugin id
#[derive(Default, Clone)]
pub struct BackendCatalog {
    factories: HashMap<String, BackendFactory>,
}

impl BackendCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for plugin `id`, replacing any previous one
    #[must_use]
    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BackendContext) -> Result<Arc<dyn BackendModule>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<&BackendFactory> {
        self.factories.get(id)
    }
}

/// HTTP surface discovered on a backend unit
pub enum BackendExport {
    SubApplication(Router),
    RouterExport(Vec<PluginRoute>),
}

impl BackendExport {
    /// Build the router to mount for plugin `plugin_id`
    ///
    /// Exported routes with paths axum would reject, or repeated paths, are
    /// skipped with a warning instead of aborting the load.
    #[must_use]
    pub fn into_router(self, plugin_id: &str) -> Router {
        match self {
            Self::SubApplication(router) => router,
            Self::RouterExport(routes) => {
                let mut router = Router::new();
                let mut seen = Vec::with_capacity(routes.len());

                for route in routes {
                    if !is_static_route_path(&route.path) {
                        tracing::warn!(
                            plugin_id = %plugin_id,
                            route = %route.name,
                            path = %route.path,
                            "skipping route with unsupported path"
                        );
                        continue;
                    }
                    if seen.contains(&route.path) {
                        tracing::warn!(
                            plugin_id = %plugin_id,
                            route = %route.name,
                            path = %route.path,
                            "skipping duplicate route"
                        );
                        continue;
                    }

                    tracing::debug!(plugin_id = %plugin_id, route = %route.name, path = %route.path, "route registered");
                    router = router.route(&route.path, route.handler);
                    seen.push(route.path);
                }

                router
            }
        }
    }
}

/// Literal paths only: leading `/`, no capture or wildcard segments
fn is_static_route_path(path: &str) -> bool {
    path.starts_with('/')
        && path
            .split('/')
            .skip(1)
            .all(|seg| !seg.starts_with(':') && !seg.starts_with('*') && !seg.contains('{'))
}

/// Result of loading a backend
#[derive(Default)]
pub struct LoadedBackend {
    pub module: Option<Arc<dyn BackendModule>>,
    pub export: Option<BackendExport>,
}

/// Instantiates backend units and caches them by plugin id
pub struct BackendLoader {
    catalog: BackendCatalog,
    cache: Mutex<HashMap<String, Arc<dyn BackendModule>>>,
}

impl BackendLoader {
    #[must_use]
    pub fn new(catalog: BackendCatalog) -> Self {
        Self {
            catalog,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the backend of plugin `id` rooted at `root`
    ///
    /// Performs blocking filesystem access and runs the unit's factory, so
    /// callers on the async runtime should use `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns `Error::EntryNotFound` if the declared entry is missing or
    /// escapes the plugin root, or the factory's error
    pub fn load(
        &self,
        id: &str,
        root: &Path,
        section: &BackendSection,
        api_prefix: &str,
    ) -> Result<LoadedBackend> {
        let Some(entry) = section.entry.as_deref().filter(|e| !e.is_empty()) else {
            tracing::info!(plugin_id = %id, "no backend entry declared");
            return Ok(LoadedBackend::default());
        };

        let entry_path =
            resolve_within(root, entry).ok_or_else(|| Error::EntryNotFound(root.join(entry)))?;
        if !entry_path.exists() {
            return Err(Error::EntryNotFound(entry_path));
        }

        let Some(module) = self.instantiate(id, root, entry_path, api_prefix)? else {
            return Ok(LoadedBackend::default());
        };

        let export = if let Some(router) = module.sub_application() {
            Some(BackendExport::SubApplication(router))
        } else if let Some(routes) = module.routes() {
            Some(BackendExport::RouterExport(routes))
        } else {
            tracing::warn!(plugin_id = %id, "backend exposes no sub-application or routes");
            None
        };

        Ok(LoadedBackend {
            module: Some(module),
            export,
        })
    }

    fn instantiate(
        &self,
        id: &str,
        root: &Path,
        entry: PathBuf,
        api_prefix: &str,
    ) -> Result<Option<Arc<dyn BackendModule>>> {
        if let Some(cached) = self.cache_lock().get(id) {
            tracing::debug!(plugin_id = %id, "reusing cached backend unit");
            return Ok(Some(Arc::clone(cached)));
        }

        let Some(factory) = self.catalog.get(id) else {
            tracing::warn!(plugin_id = %id, entry = %entry.display(), "no backend unit registered for plugin");
            return Ok(None);
        };

        let context = BackendContext {
            plugin_id: id.to_string(),
            root: root.to_path_buf(),
            entry,
            api_prefix: api_prefix.to_string(),
        };
        let module = factory(&context)?;

        self.cache_lock().insert(id.to_string(), Arc::clone(&module));
        tracing::debug!(plugin_id = %id, "backend unit instantiated");
        Ok(Some(module))
    }

    /// Drop the cached unit of plugin `id` so the next load re-instantiates it
    pub fn evict(&self, id: &str) -> Option<Arc<dyn BackendModule>> {
        self.cache_lock().remove(id)
    }

    /// Evict the cached unit of `id` only if it is `unit`
    ///
    /// Returns whether the entry was removed. A unit cached by a later load
    /// is left alone.
    pub fn evict_unit(&self, id: &str, unit: &Arc<dyn BackendModule>) -> bool {
        let mut cache = self.cache_lock();
        if cache.get(id).is_some_and(|cached| Arc::ptr_eq(cached, unit)) {
            cache.remove(id);
            return true;
        }
        false
    }

    /// Whether a unit for `id` is cached
    #[must_use]
    pub fn is_cached(&self, id: &str) -> bool {
        self.cache_lock().contains_key(id)
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn BackendModule>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
