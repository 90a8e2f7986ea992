//! Shared test utilities

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::routing::get;
use dockyard::api::ApiServerBuilder;
use dockyard::db::{PluginRecord, PluginRepo};
use dockyard::plugins::{BackendCatalog, BackendModule, PluginRegistry, PluginRoute, RegistryOptions};
use dockyard::{DbPool, SharedPluginRegistry, db};
use semver::Version;

pub const API_KEY: &str = "test-api-key";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Backend exposing `GET /ping` and `GET /echo`
pub struct PingBackend;

impl BackendModule for PingBackend {
    fn routes(&self) -> Option<Vec<PluginRoute>> {
        Some(vec![
            PluginRoute::new("ping", "/ping", get(|| async { "pong" })),
            PluginRoute::new(
                "echo",
                "/echo",
                get(|uri: axum::http::Uri| async move {
                    Json(serde_json::json!({ "path": uri.path(), "query": uri.query() }))
                }),
            ),
        ])
    }
}

/// Catalog registering `PingBackend` for the given ids
#[must_use]
pub fn ping_catalog(ids: &[&str]) -> BackendCatalog {
    ids.iter().fold(BackendCatalog::new(), |catalog, id| {
        catalog.with(*id, |_| Ok(Arc::new(PingBackend) as Arc<dyn BackendModule>))
    })
}

/// Write a plugin directory with a backend entry and the given manifest
/// fields merged over the identity fields
pub fn write_plugin(root: &Path, id: &str, extra: serde_json::Value) {
    let dir = root.join(id);
    std::fs::create_dir_all(dir.join("backend")).expect("create plugin dir");
    std::fs::write(dir.join("backend/main"), "").expect("write entry");

    let mut manifest = serde_json::json!({
        "id": id,
        "name": id.to_uppercase(),
        "version": "1.0.0",
        "description": format!("{id} plugin"),
        "backend": { "entry": "backend/main" },
    });
    if let (Some(base), Some(extra)) = (manifest.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    std::fs::write(dir.join("manifest.json"), manifest.to_string()).expect("write manifest");
}

/// Insert a plugin record
pub fn insert_record(db: &DbPool, id: &str, enabled: bool) {
    let mut record = PluginRecord::new(id, id, "1.0.0");
    record.enabled = enabled;
    PluginRepo::new(db.clone()).upsert(&record).expect("insert record");
}

/// Build a registry over `db` rooted at `root`
#[must_use]
pub fn build_registry(root: &Path, db: &DbPool, catalog: BackendCatalog) -> SharedPluginRegistry {
    let options = RegistryOptions::new(root, Version::new(1, 2, 0));
    let store = Arc::new(PluginRepo::new(db.clone()));
    Arc::new(PluginRegistry::new(options, store, catalog))
}

/// Build the full host router
#[must_use]
pub fn build_test_router(db: &DbPool, registry: &SharedPluginRegistry) -> axum::Router {
    ApiServerBuilder::new(db.clone(), Arc::clone(registry), 0)
        .api_key(Some(API_KEY.to_string()))
        .build()
        .router()
}
