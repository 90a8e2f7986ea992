//! Plugin registry - the single authority over plugin lifecycle
//!
//! Every load, unload, enable and disable runs under one lifecycle lock, so
//! operations on the registry are serialized. A plugin becomes visible in the
//! active set only after all of its phases succeed, and its routes and assets
//! are removed again on unload.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use semver::Version;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::assets::{AssetMounts, AssetTarget, plan_frontend_assets};
use super::discovery::{plugin_dir, read_manifest};
use super::loader::{BackendCatalog, BackendLoader, BackendModule, LoadedBackend};
use super::manifest::{PluginManifest, RouteDescriptor};
use super::routing::RouteTable;
use super::version::check_compatibility;
use crate::db::PluginStore;
use crate::{Error, Result};

/// Shared registry handle
pub type SharedPluginRegistry = Arc<PluginRegistry>;

/// Default host API base the plugin prefixes are mounted below
pub const DEFAULT_API_BASE: &str = "/api/v1";

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Directory holding one subdirectory per plugin
    pub plugins_root: PathBuf,
    /// Host core version plugins are checked against
    pub core_version: Version,
    /// Prefix prepended to every plugin's `api_prefix`
    pub api_base: String,
    /// Upper bound on a single plugin's load pipeline
    pub load_timeout: Duration,
    /// Plugins loaded concurrently at boot
    pub boot_concurrency: usize,
}

impl RegistryOptions {
    #[must_use]
    pub fn new(plugins_root: impl Into<PathBuf>, core_version: Version) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            core_version,
            api_base: DEFAULT_API_BASE.to_string(),
            load_timeout: Duration::from_secs(30),
            boot_concurrency: 4,
        }
    }
}

/// Lifecycle state of an active plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Active,
}

/// A loaded plugin
pub struct ActivePluginEntry {
    pub manifest: PluginManifest,
    pub status: PluginState,
    pub loaded_at: DateTime<Utc>,
    /// Mount point of the backend handlers, if any were mounted
    pub api_mount: Option<String>,
    /// Public frontend asset paths
    pub asset_paths: Vec<String>,
    module: Option<Arc<dyn BackendModule>>,
}

impl ActivePluginEntry {
    /// Whether a backend unit was instantiated for this plugin
    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.module.is_some()
    }
}

impl std::fmt::Debug for ActivePluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePluginEntry")
            .field("id", &self.manifest.id)
            .field("status", &self.status)
            .field("loaded_at", &self.loaded_at)
            .field("api_mount", &self.api_mount)
            .field("asset_paths", &self.asset_paths)
            .field("has_backend", &self.module.is_some())
            .finish()
    }
}

/// Listing view of an active plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    #[serde(flatten)]
    pub manifest: PluginManifest,
    pub status: PluginState,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<RouteDescriptor>>,
}

/// Outcome of loading every enabled plugin
#[derive(Debug, Default, Serialize)]
pub struct BootReport {
    pub loaded: Vec<String>,
    /// Plugin id and failure message
    pub failed: Vec<(String, String)>,
}

/// Outcome of reconciling persisted and loaded state
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Plugins that were loaded but not enabled, now unloaded
    pub unloaded: Vec<String>,
    /// Plugins enabled in the store but not loaded
    pub missing: Vec<String>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.unloaded.is_empty() && self.missing.is_empty()
    }
}

/// Everything produced by the blocking phases of a load
struct PreparedPlugin {
    manifest: PluginManifest,
    api_prefix: String,
    backend: LoadedBackend,
    assets: Vec<(String, AssetTarget)>,
}

/// Validate, version-check and instantiate plugin `id`
fn prepare_plugin(
    loader: &BackendLoader,
    root: &Path,
    id: &str,
    core_version: &Version,
    api_base: &str,
) -> Result<PreparedPlugin> {
    let dir = plugin_dir(root, id)?;
    let manifest = read_manifest(&dir)?;
    check_compatibility(&manifest.dependencies.core, core_version)?;

    let api_prefix = format!("{}{}", api_base.trim_end_matches('/'), manifest.api_prefix());

    let backend = match &manifest.backend {
        Some(section) => loader.load(id, &dir, section, &api_prefix)?,
        None => LoadedBackend::default(),
    };
    let assets = plan_frontend_assets(&dir, &manifest);

    Ok(PreparedPlugin {
        manifest,
        api_prefix,
        backend,
        assets,
    })
}

/// Central plugin registry
pub struct PluginRegistry {
    options: RegistryOptions,
    store: Arc<dyn PluginStore>,
    loader: Arc<BackendLoader>,
    routes: Arc<RouteTable>,
    assets: Arc<AssetMounts>,
    active: RwLock<HashMap<String, Arc<ActivePluginEntry>>>,
    lifecycle: Mutex<()>,
}

impl PluginRegistry {
    /// Create a registry with nothing loaded
    #[must_use]
    pub fn new(options: RegistryOptions, store: Arc<dyn PluginStore>, catalog: BackendCatalog) -> Self {
        Self {
            options,
            store,
            loader: Arc::new(BackendLoader::new(catalog)),
            routes: Arc::new(RouteTable::new()),
            assets: Arc::new(AssetMounts::new()),
            active: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    #[must_use]
    pub fn plugins_root(&self) -> &Path {
        &self.options.plugins_root
    }

    /// Persisted plugin records
    #[must_use]
    pub fn store(&self) -> Arc<dyn PluginStore> {
        Arc::clone(&self.store)
    }

    /// Live plugin route bindings
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Live plugin asset bindings
    #[must_use]
    pub fn assets(&self) -> &AssetMounts {
        &self.assets
    }

    /// Load plugin `id` from the plugins root
    ///
    /// Loading an already active plugin is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Validation`, `IncompatibleVersion`,
    /// `EntryNotFound`, `LoadTimeout` or `LoadFailed`; nothing stays mounted
    /// after a failure
    pub async fn load_plugin(&self, id: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.load_locked(id).await
    }

    /// Unload plugin `id`, a no-op if it is not active
    ///
    /// # Errors
    ///
    /// Currently infallible; teardown failures are logged and unloading
    /// continues
    pub async fn unload_plugin(&self, id: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(id).await;
        Ok(())
    }

    /// Persist `enabled = true` for plugin `id` and load it
    ///
    /// If loading fails the record is rolled back to disabled.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record exists, the load error, or
    /// `Inconsistent` if persisted and loaded state disagree afterwards
    pub async fn enable_plugin(&self, id: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("plugin record {id}")))?;

        if record.enabled {
            tracing::info!(plugin_id = %id, "plugin already enabled");
        } else {
            self.store.set_enabled(id, true)?;

            if let Err(e) = self.load_locked(id).await {
                if let Err(rollback) = self.store.set_enabled(id, false) {
                    tracing::error!(plugin_id = %id, error = %rollback, "failed to roll back enabled flag");
                }
                return Err(e);
            }
            tracing::info!(plugin_id = %id, "plugin enabled");
        }

        self.verify_consistent(id).await
    }

    /// Persist `enabled = false` for plugin `id` and unload it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record exists, a store error, or
    /// `Inconsistent` if persisted and loaded state disagree afterwards
    pub async fn disable_plugin(&self, id: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("plugin record {id}")))?;

        if record.enabled {
            self.store.set_enabled(id, false)?;
            self.unload_locked(id).await;
            tracing::info!(plugin_id = %id, "plugin disabled");
        } else {
            tracing::info!(plugin_id = %id, "plugin already disabled");
            // Drop code loaded outside enable, e.g. by a direct load
            self.unload_locked(id).await;
        }

        self.verify_consistent(id).await
    }

    /// Load every plugin the store marks enabled
    ///
    /// One plugin failing never prevents the others from loading.
    ///
    /// # Errors
    ///
    /// Returns error only if the enabled set cannot be read
    pub async fn load_enabled_plugins(&self) -> Result<BootReport> {
        let enabled = self.store.list_enabled()?;
        tracing::info!(count = enabled.len(), "loading enabled plugins");

        let results: Vec<(String, Result<()>)> = futures::stream::iter(enabled)
            .map(|record| async move {
                let result = self.load_plugin(&record.uuid).await;
                (record.uuid, result)
            })
            .buffer_unordered(self.options.boot_concurrency.max(1))
            .collect()
            .await;

        let mut report = BootReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.loaded.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
        report.loaded.sort();
        report.failed.sort();

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "enabled plugins loaded"
        );
        Ok(report)
    }

    /// Bring the loaded set in line with the persisted enabled set
    ///
    /// Active plugins that are not enabled are unloaded. Enabled plugins that
    /// are not active are reported.
    ///
    /// # Errors
    ///
    /// Returns error if the enabled set cannot be read
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.lifecycle.lock().await;

        let enabled: HashSet<String> = self
            .store
            .list_enabled()?
            .into_iter()
            .map(|record| record.uuid)
            .collect();
        let active: Vec<String> = self.active.read().await.keys().cloned().collect();

        let mut report = ReconcileReport::default();
        for id in active {
            if !enabled.contains(&id) {
                tracing::error!(plugin_id = %id, "plugin loaded but not enabled, unloading");
                self.unload_locked(&id).await;
                report.unloaded.push(id);
            }
        }

        let active = self.active.read().await;
        for id in enabled {
            if !active.contains_key(&id) {
                tracing::error!(plugin_id = %id, "plugin enabled but not loaded");
                report.missing.push(id);
            }
        }
        drop(active);

        report.unloaded.sort();
        report.missing.sort();
        Ok(report)
    }

    /// Unload every active plugin
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let ids: Vec<String> = self.active.read().await.keys().cloned().collect();
        for id in ids {
            self.unload_locked(&id).await;
        }
    }

    /// Active plugins, sorted by id
    pub async fn list_plugins(&self) -> Vec<PluginSummary> {
        let active = self.active.read().await;
        let mut summaries: Vec<PluginSummary> = active
            .values()
            .map(|entry| {
                let routes = entry.manifest.computed_routes();
                PluginSummary {
                    manifest: entry.manifest.clone(),
                    status: entry.status,
                    loaded_at: entry.loaded_at,
                    routes: (!routes.is_empty()).then_some(routes),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        summaries
    }

    /// Active entry of plugin `id`
    pub async fn get(&self, id: &str) -> Option<Arc<ActivePluginEntry>> {
        self.active.read().await.get(id).cloned()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.active.read().await.contains_key(id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    async fn load_locked(&self, id: &str) -> Result<()> {
        if self.is_active(id).await {
            tracing::info!(plugin_id = %id, "plugin already loaded");
            return Ok(());
        }

        tracing::info!(plugin_id = %id, "loading plugin");
        let prepared = self.prepare(id).await.map_err(|e| surface_load_error(id, e))?;
        let PreparedPlugin {
            manifest,
            api_prefix,
            backend,
            assets,
        } = prepared;

        let mut api_mount = None;
        if let Some(export) = backend.export {
            if let Err(e) = self.routes.mount(id, &api_prefix, export.into_router(id)).await {
                tracing::error!(plugin_id = %id, error = %e, "failed to mount plugin routes");
                self.discard_backend(id, backend.module.as_ref()).await;
                return Err(e);
            }
            api_mount = Some(api_prefix);
        }

        let mut asset_paths = Vec::with_capacity(assets.len());
        for (path, target) in assets {
            if let Err(e) = self.assets.mount(id, &path, target).await {
                tracing::error!(plugin_id = %id, error = %e, "failed to mount frontend assets");
                self.routes.unmount_owner(id).await;
                self.assets.unmount_owner(id).await;
                self.discard_backend(id, backend.module.as_ref()).await;
                return Err(e);
            }
            asset_paths.push(path);
        }

        let entry = ActivePluginEntry {
            manifest,
            status: PluginState::Active,
            loaded_at: Utc::now(),
            api_mount,
            asset_paths,
            module: backend.module,
        };
        tracing::info!(
            plugin_id = %id,
            version = %entry.manifest.version,
            api_mount = ?entry.api_mount,
            assets = entry.asset_paths.len(),
            "plugin loaded"
        );
        self.active.write().await.insert(id.to_string(), Arc::new(entry));

        Ok(())
    }

    /// Run the blocking load phases off the async runtime, bounded by the
    /// load timeout
    async fn prepare(&self, id: &str) -> Result<PreparedPlugin> {
        let loader = Arc::clone(&self.loader);
        let root = self.options.plugins_root.clone();
        let core_version = self.options.core_version.clone();
        let api_base = self.options.api_base.clone();
        let owned_id = id.to_string();

        let mut task = tokio::task::spawn_blocking(move || {
            prepare_plugin(&loader, &root, &owned_id, &core_version, &api_base)
        });

        let outcome = tokio::time::timeout(self.options.load_timeout, &mut task).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::LoadFailed {
                id: id.to_string(),
                reason: join.to_string(),
            }),
            Err(_) => {
                // The blocking task cannot be cancelled; drop whatever it
                // instantiates once it finishes.
                let loader = Arc::clone(&self.loader);
                let late_id = id.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(prepared)) = task.await
                        && let Some(module) = prepared.backend.module
                    {
                        loader.evict_unit(&late_id, &module);
                        // Still held elsewhere means a later load reused it
                        if Arc::strong_count(&module) == 1 {
                            if let Err(e) = module.teardown().await {
                                tracing::warn!(plugin_id = %late_id, error = %e, "backend teardown failed");
                            }
                            tracing::warn!(plugin_id = %late_id, "discarded backend that finished after timeout");
                        }
                    }
                });

                Err(Error::LoadTimeout {
                    id: id.to_string(),
                    timeout: self.options.load_timeout,
                })
            }
        }
    }

    async fn unload_locked(&self, id: &str) {
        let Some(entry) = self.get(id).await else {
            tracing::info!(plugin_id = %id, "plugin not loaded");
            return;
        };

        self.routes.unmount_owner(id).await;
        self.assets.unmount_owner(id).await;
        self.discard_backend(id, entry.module.as_ref()).await;
        self.active.write().await.remove(id);

        tracing::info!(plugin_id = %id, "plugin unloaded");
    }

    async fn discard_backend(&self, id: &str, module: Option<&Arc<dyn BackendModule>>) {
        if let Some(module) = module
            && let Err(e) = module.teardown().await
        {
            tracing::warn!(plugin_id = %id, error = %e, "backend teardown failed");
        }
        self.loader.evict(id);
    }

    async fn verify_consistent(&self, id: &str) -> Result<()> {
        let persisted = self.store.get(id)?.is_some_and(|record| record.enabled);
        let loaded = self.is_active(id).await;

        if persisted == loaded {
            return Ok(());
        }

        tracing::error!(plugin_id = %id, persisted, loaded, "plugin state inconsistent");
        Err(Error::Inconsistent(format!(
            "plugin {id} is {} but {}",
            if persisted { "enabled" } else { "disabled" },
            if loaded { "loaded" } else { "not loaded" },
        )))
    }
}

/// Keep the load error taxonomy; anything else becomes `LoadFailed`
fn surface_load_error(id: &str, error: Error) -> Error {
    match error {
        Error::NotFound(_)
        | Error::Validation(_)
        | Error::IncompatibleVersion { .. }
        | Error::EntryNotFound(_)
        | Error::LoadTimeout { .. }
        | Error::LoadFailed { .. } => {
            tracing::error!(plugin_id = %id, error = %error, "plugin load failed");
            error
        }
        other => {
            tracing::error!(plugin_id = %id, error = ?other, "unexpected error while loading plugin");
            Error::LoadFailed {
                id: id.to_string(),
                reason: other.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::get;

    use super::*;
    use crate::db::PluginRecord;
    use crate::plugins::loader::PluginRoute;

    /// In-memory store with switchable failure
    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<HashMap<String, PluginRecord>>,
    }

    impl MemoryStore {
        fn with(records: &[(&str, bool)]) -> Arc<Self> {
            let store = Self::default();
            for (id, enabled) in records {
                let mut record = PluginRecord::new(*id, *id, "1.0.0");
                record.enabled = *enabled;
                store.records.lock().unwrap().insert((*id).to_string(), record);
            }
            Arc::new(store)
        }
    }

    impl PluginStore for MemoryStore {
        fn get(&self, uuid: &str) -> Result<Option<PluginRecord>> {
            Ok(self.records.lock().unwrap().get(uuid).cloned())
        }

        fn list_enabled(&self) -> Result<Vec<PluginRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.enabled)
                .cloned()
                .collect())
        }

        fn set_enabled(&self, uuid: &str, enabled: bool) -> Result<bool> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get_mut(uuid)
                .map(|r| r.enabled = enabled)
                .is_some())
        }
    }

    struct Counting {
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackendModule for Counting {
        fn routes(&self) -> Option<Vec<PluginRoute>> {
            Some(vec![PluginRoute::new("ping", "/ping", get(|| async { "pong" }))])
        }

        async fn teardown(&self) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Err(Error::Config("teardown always complains".to_string()))
        }
    }

    fn write_plugin(root: &Path, id: &str, extra: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(dir.join("backend")).unwrap();
        std::fs::write(dir.join("backend/main"), "").unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            format!(
                r#"{{"id":"{id}","name":"{id}","version":"1.0.0","description":"d",
                    "backend":{{"entry":"backend/main"}}{extra}}}"#
            ),
        )
        .unwrap();
    }

    fn registry(root: &Path, store: Arc<MemoryStore>, teardowns: &Arc<AtomicUsize>) -> PluginRegistry {
        let counter = Arc::clone(teardowns);
        let catalog = BackendCatalog::new().with("crm", move |_| {
            Ok(Arc::new(Counting {
                teardowns: Arc::clone(&counter),
            }) as Arc<dyn BackendModule>)
        });
        let options = RegistryOptions::new(root, Version::new(1, 2, 0));
        PluginRegistry::new(options, store, catalog)
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), MemoryStore::with(&[]), &teardowns);

        registry.load_plugin("crm").await.unwrap();
        let first = registry.get("crm").await.unwrap().loaded_at;
        registry.load_plugin("crm").await.unwrap();

        assert_eq!(registry.active_count().await, 1);
        assert_eq!(registry.get("crm").await.unwrap().loaded_at, first);
        assert_eq!(registry.routes().prefixes().await, vec!["/api/v1/plugins/crm"]);
    }

    #[tokio::test]
    async fn unload_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), MemoryStore::with(&[]), &teardowns);

        registry.load_plugin("crm").await.unwrap();
        registry.unload_plugin("crm").await.unwrap();

        assert!(!registry.is_active("crm").await);
        assert!(registry.routes().prefixes().await.is_empty());
        assert!(!registry.loader.is_cached("crm"));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);

        registry.unload_plugin("crm").await.unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_leaves_nothing() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", r#","dependencies":{"core":"2.0.0"}"#);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), MemoryStore::with(&[]), &teardowns);

        let err = registry.load_plugin("crm").await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleVersion { .. }));
        assert!(!registry.is_active("crm").await);
        assert!(registry.routes().prefixes().await.is_empty());

        assert!(matches!(
            registry.load_plugin("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn enable_failure_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("crm");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            r#"{"id":"crm","name":"CRM","version":"1.0.0","description":"d",
                "backend":{"entry":"backend/missing"}}"#,
        )
        .unwrap();
        let store = MemoryStore::with(&[("crm", false)]);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), Arc::clone(&store), &teardowns);

        let err = registry.enable_plugin("crm").await.unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(_)));
        assert!(!store.get("crm").unwrap().unwrap().enabled);
        assert!(!registry.is_active("crm").await);
    }

    #[tokio::test]
    async fn enable_disable_cycle() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let store = MemoryStore::with(&[("crm", false)]);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), Arc::clone(&store), &teardowns);

        registry.enable_plugin("crm").await.unwrap();
        assert!(store.get("crm").unwrap().unwrap().enabled);
        assert!(registry.is_active("crm").await);

        registry.enable_plugin("crm").await.unwrap();
        assert_eq!(registry.active_count().await, 1);

        registry.disable_plugin("crm").await.unwrap();
        assert!(!store.get("crm").unwrap().unwrap().enabled);
        assert!(!registry.is_active("crm").await);

        assert!(matches!(
            registry.enable_plugin("ghost").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.disable_plugin("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn boot_isolates_failures() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        write_plugin(root.path(), "pay", "");
        std::fs::write(root.path().join("pay/manifest.json"), "{broken").unwrap();
        let store = MemoryStore::with(&[("crm", true), ("pay", true), ("ghost", true)]);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), store, &teardowns);

        let report = registry.load_enabled_plugins().await.unwrap();
        assert_eq!(report.loaded, vec!["crm"]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, "ghost");
        assert_eq!(report.failed[1].0, "pay");

        let reconcile = registry.reconcile().await.unwrap();
        assert!(reconcile.unloaded.is_empty());
        assert_eq!(reconcile.missing, vec!["ghost", "pay"]);
    }

    #[tokio::test]
    async fn reconcile_unloads_disabled() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let store = MemoryStore::with(&[("crm", false)]);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), store, &teardowns);

        registry.load_plugin("crm").await.unwrap();
        let report = registry.reconcile().await.unwrap();
        assert_eq!(report.unloaded, vec!["crm"]);
        assert!(!registry.is_active("crm").await);
        assert!(!report.is_consistent());
    }

    #[tokio::test]
    async fn listing_includes_computed_routes() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", r#","components":["CrmRecords"]"#);
        write_plugin(root.path(), "pay", "");
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), MemoryStore::with(&[]), &teardowns);

        registry.load_plugin("pay").await.unwrap();
        registry.load_plugin("crm").await.unwrap();

        let listing = registry.list_plugins().await;
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].manifest.id, "crm");
        assert_eq!(listing[0].routes.as_ref().unwrap()[0].path, "/plugins/crm/records");
        assert!(listing[1].routes.is_none());

        let json = serde_json::to_value(&listing[1]).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["id"], "pay");
        assert!(json.get("routes").is_none());
    }

    #[tokio::test]
    async fn load_timeout_is_reported() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "slow", "");
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&teardowns);
        let catalog = BackendCatalog::new().with("slow", move |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Arc::new(Counting {
                teardowns: Arc::clone(&counter),
            }) as Arc<dyn BackendModule>)
        });
        let mut options = RegistryOptions::new(root.path(), Version::new(1, 2, 0));
        options.load_timeout = Duration::from_millis(20);
        let registry = PluginRegistry::new(options, MemoryStore::with(&[]), catalog);

        let err = registry.load_plugin("slow").await.unwrap_err();
        assert!(matches!(err, Error::LoadTimeout { .. }));
        assert!(!registry.is_active("slow").await);

        // The unit that arrives late is torn down and dropped from the cache
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(!registry.loader.is_cached("slow"));
    }

    #[tokio::test]
    async fn disable_when_already_disabled_is_noop() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let store = MemoryStore::with(&[("crm", false)]);
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), Arc::clone(&store), &teardowns);

        registry.disable_plugin("crm").await.unwrap();
        assert!(!store.get("crm").unwrap().unwrap().enabled);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);

        // Code loaded without enabling is dropped by a disable
        registry.load_plugin("crm").await.unwrap();
        registry.disable_plugin("crm").await.unwrap();
        assert!(!registry.is_active("crm").await);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shared_frontend_entry_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        for id in ["aaa", "bbb"] {
            write_plugin(root.path(), id, r#","frontend":{"entry":"shared"}"#);
        }
        let teardowns = Arc::new(AtomicUsize::new(0));
        let registry = registry(root.path(), MemoryStore::with(&[]), &teardowns);

        registry.load_plugin("aaa").await.unwrap();
        let err = registry.load_plugin("bbb").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!registry.is_active("bbb").await);
        assert_eq!(registry.assets().paths().await, vec!["/plugins/shared/manifest.json"]);

        // The first owner keeps its mounts after the rejected plugin is gone
        registry.unload_plugin("bbb").await.unwrap();
        assert!(registry.is_active("aaa").await);
        assert_eq!(registry.assets().paths().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enable_disable_is_linearized() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "crm", "");
        let store = MemoryStore::with(&[("crm", false)]);
        let loads = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (load_counter, teardown_counter) = (Arc::clone(&loads), Arc::clone(&teardowns));
        let catalog = BackendCatalog::new().with("crm", move |_| {
            load_counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counting {
                teardowns: Arc::clone(&teardown_counter),
            }) as Arc<dyn BackendModule>)
        });
        let options = RegistryOptions::new(root.path(), Version::new(1, 2, 0));
        let registry = Arc::new(PluginRegistry::new(options, store.clone(), catalog));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        registry.enable_plugin("crm").await
                    } else {
                        registry.disable_plugin("crm").await
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let active = registry.active_count().await;
        assert!(active <= 1);
        assert_eq!(registry.routes().prefixes().await.len(), active);
        assert_eq!(
            loads.load(Ordering::SeqCst),
            teardowns.load(Ordering::SeqCst) + active
        );
        assert_eq!(store.get("crm").unwrap().unwrap().enabled, active == 1);
        assert!(registry.reconcile().await.unwrap().is_consistent());
    }

    #[test]
    fn unexpected_errors_become_load_failed() {
        let err = surface_load_error("crm", Error::Database("locked".to_string()));
        assert!(matches!(err, Error::LoadFailed { ref id, .. } if id == "crm"));

        let err = surface_load_error("crm", Error::Validation("bad".to_string()));
        assert!(matches!(err, Error::Validation(_)));
    }
}
