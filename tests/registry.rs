//! Plugin registry integration tests over the SQLite store

use dockyard::Error;
use dockyard::db::{PluginRepo, PluginStore};
use serde_json::json;

mod common;
use common::{build_registry, insert_record, ping_catalog, setup_test_db, write_plugin};

#[tokio::test]
async fn load_twice_yields_one_entry() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({}));
    let db = setup_test_db();
    let registry = build_registry(root.path(), &db, ping_catalog(&["crm"]));

    tokio_test::assert_ok!(registry.load_plugin("crm").await);
    tokio_test::assert_ok!(registry.load_plugin("crm").await);

    assert_eq!(registry.list_plugins().await.len(), 1);
    assert_eq!(registry.routes().prefixes().await.len(), 1);
}

#[tokio::test]
async fn unload_then_load_restores_listing() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({ "components": ["CrmRecords"] }));
    let db = setup_test_db();
    let registry = build_registry(root.path(), &db, ping_catalog(&["crm"]));

    registry.load_plugin("crm").await.unwrap();
    let before = serde_json::to_value(&registry.list_plugins().await[0].manifest).unwrap();
    let routes_before = registry.list_plugins().await[0].routes.clone();

    registry.unload_plugin("crm").await.unwrap();
    assert!(registry.list_plugins().await.is_empty());

    registry.load_plugin("crm").await.unwrap();
    let after = registry.list_plugins().await;
    assert_eq!(serde_json::to_value(&after[0].manifest).unwrap(), before);
    assert_eq!(after[0].routes, routes_before);
}

#[tokio::test]
async fn manifest_without_description_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("crm");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        r#"{"id":"crm","name":"CRM","version":"1.0.0"}"#,
    )
    .unwrap();
    let db = setup_test_db();
    let registry = build_registry(root.path(), &db, ping_catalog(&[]));

    let err = registry.load_plugin("crm").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("description"));
    assert!(registry.list_plugins().await.is_empty());
}

#[tokio::test]
async fn directory_name_must_match_id() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({ "id": "sales" }));
    let db = setup_test_db();
    let registry = build_registry(root.path(), &db, ping_catalog(&[]));

    assert!(matches!(
        registry.load_plugin("crm").await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn enable_persists_and_rolls_back() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({}));
    write_plugin(
        root.path(),
        "broken",
        json!({ "backend": { "entry": "backend/absent" } }),
    );
    let db = setup_test_db();
    insert_record(&db, "crm", false);
    insert_record(&db, "broken", false);
    let registry = build_registry(root.path(), &db, ping_catalog(&["crm", "broken"]));
    let repo = PluginRepo::new(db.clone());

    registry.enable_plugin("crm").await.unwrap();
    assert!(repo.get("crm").unwrap().unwrap().enabled);
    assert!(registry.is_active("crm").await);

    let err = registry.enable_plugin("broken").await.unwrap_err();
    assert!(matches!(err, Error::EntryNotFound(_)));
    assert!(!repo.get("broken").unwrap().unwrap().enabled);
    assert!(!registry.is_active("broken").await);

    registry.disable_plugin("crm").await.unwrap();
    assert!(!repo.get("crm").unwrap().unwrap().enabled);
    assert!(!registry.is_active("crm").await);
}

#[tokio::test]
async fn boot_loads_enabled_and_reports_failures() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({}));
    write_plugin(root.path(), "pay", json!({ "dependencies": { "core": "1.9.0" } }));
    write_plugin(root.path(), "idle", json!({}));
    let db = setup_test_db();
    insert_record(&db, "crm", true);
    insert_record(&db, "pay", true);
    insert_record(&db, "idle", false);
    let registry = build_registry(root.path(), &db, ping_catalog(&["crm", "pay", "idle"]));

    let report = registry.load_enabled_plugins().await.unwrap();
    assert_eq!(report.loaded, vec!["crm"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "pay");
    assert!(report.failed[0].1.contains("1.9.0"));
    assert!(!registry.is_active("idle").await);

    let reconcile = registry.reconcile().await.unwrap();
    assert_eq!(reconcile.missing, vec!["pay"]);
}

#[tokio::test]
async fn shutdown_unloads_everything() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "crm", json!({}));
    write_plugin(root.path(), "pay", json!({}));
    let db = setup_test_db();
    let registry = build_registry(root.path(), &db, ping_catalog(&["crm", "pay"]));

    registry.load_plugin("crm").await.unwrap();
    registry.load_plugin("pay").await.unwrap();
    registry.shutdown().await;

    assert_eq!(registry.active_count().await, 0);
    assert!(registry.routes().prefixes().await.is_empty());
}
