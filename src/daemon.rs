//! Daemon - the plugin host service
//!
//! Opens the database, boots the plugin registry from persisted state and
//! serves the HTTP API until interrupted.

use std::sync::Arc;

use crate::api::ApiServerBuilder;
use crate::db::{self, DbPool, PluginRepo};
use crate::plugins::{BackendCatalog, PluginRegistry, SharedPluginRegistry};
use crate::{Config, Result};

/// The Dockyard daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.db_path();
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        Ok(Self { config, db })
    }

    /// Build the plugin registry over the daemon's database
    ///
    /// # Errors
    ///
    /// Returns error if the configured core version is invalid
    pub fn registry(&self, catalog: BackendCatalog) -> Result<SharedPluginRegistry> {
        let options = self.config.plugins.registry_options()?;
        let store = Arc::new(PluginRepo::new(self.db.clone()));
        Ok(Arc::new(PluginRegistry::new(options, store, catalog)))
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the registry cannot be booted or the server fails
    pub async fn run(self, catalog: BackendCatalog) -> Result<()> {
        let registry = self.registry(catalog)?;

        tracing::info!(
            plugins_dir = %self.config.plugins.dir.display(),
            core_version = %registry.options().core_version,
            "booting plugin registry"
        );

        let report = registry.load_enabled_plugins().await?;
        for (id, reason) in &report.failed {
            tracing::warn!(plugin_id = %id, reason = %reason, "plugin not loaded at boot");
        }

        let reconcile = registry.reconcile().await?;
        if !reconcile.is_consistent() {
            tracing::error!(
                unloaded = ?reconcile.unloaded,
                missing = ?reconcile.missing,
                "plugin registry diverged from persisted state at boot"
            );
        }

        let server = ApiServerBuilder::new(
            self.db.clone(),
            Arc::clone(&registry),
            self.config.api_server.port,
        )
        .api_key(self.config.api_server.api_key.clone())
        .static_dir(self.config.api_server.static_dir.clone())
        .gate_exempt(self.config.plugins.gate_exempt.clone())
        .build();

        tracing::info!(
            port = self.config.api_server.port,
            active = registry.active_count().await,
            "daemon running"
        );

        let result = server.run(shutdown_signal()).await;

        tracing::info!("shutting down, unloading plugins");
        registry.shutdown().await;

        result
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
