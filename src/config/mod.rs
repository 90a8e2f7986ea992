//! Configuration management for Dockyard
//!
//! Values are layered env > `config.toml` > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::Result;
use crate::plugins::registry::{DEFAULT_API_BASE, RegistryOptions};
use crate::plugins::version::parse_host_version;

use file::DockyardConfigFile;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8700;

/// Database file name inside the data directory
pub const DB_FILE: &str = "dockyard.db";

/// Dockyard configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Plugin runtime configuration
    pub plugins: PluginsConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// API key for admin endpoints (from `DOCKYARD_API_KEY` env)
    pub api_key: Option<String>,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,
}

/// Plugin runtime configuration
#[derive(Debug, Clone)]
pub struct PluginsConfig {
    /// Directory holding one subdirectory per plugin
    pub dir: PathBuf,

    /// Host core version
    pub core_version: String,

    /// Prefix every plugin API prefix is mounted below
    pub api_base: String,

    /// Upper bound on a single plugin load
    pub load_timeout: Duration,

    /// Plugins loaded concurrently at boot
    pub boot_concurrency: usize,

    /// Path prefixes the request gate never inspects
    pub gate_exempt: Vec<String>,
}

impl PluginsConfig {
    /// Registry settings for this configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the core version is not valid semver
    pub fn registry_options(&self) -> Result<RegistryOptions> {
        let mut options = RegistryOptions::new(&self.dir, parse_host_version(&self.core_version)?);
        options.api_base.clone_from(&self.api_base);
        options.load_timeout = self.load_timeout;
        options.boot_concurrency = self.boot_concurrency;
        Ok(options)
    }
}

impl Config {
    /// Load configuration from environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok());
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(config)
    }

    /// Build configuration from a parsed config file and an env lookup
    #[must_use]
    pub fn from_sources(fc: DockyardConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("DOCKYARD_DATA_DIR")
            .map(PathBuf::from)
            .or(fc.data_dir)
            .unwrap_or_else(default_data_dir);

        // API server config (env > toml > default)
        let api_server = ApiServerConfig {
            port: env("DOCKYARD_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            api_key: env("DOCKYARD_API_KEY").filter(|k| !k.is_empty()),
            static_dir: env("DOCKYARD_STATIC_DIR")
                .map(PathBuf::from)
                .or(fc.server.static_dir),
        };

        let gate_exempt = env("DOCKYARD_GATE_EXEMPT").map_or(fc.plugins.gate_exempt, |list| {
            list.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        });

        let plugins = PluginsConfig {
            dir: env("DOCKYARD_PLUGINS_DIR")
                .map(PathBuf::from)
                .or(fc.plugins.dir)
                .unwrap_or_else(|| data_dir.join("plugins")),
            core_version: env("DOCKYARD_CORE_VERSION")
                .or(fc.plugins.core_version)
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            api_base: env("DOCKYARD_API_BASE")
                .or(fc.plugins.api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            load_timeout: Duration::from_secs(
                env("DOCKYARD_LOAD_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .or(fc.plugins.load_timeout_secs)
                    .unwrap_or(30),
            ),
            boot_concurrency: env("DOCKYARD_BOOT_CONCURRENCY")
                .and_then(|s| s.parse().ok())
                .or(fc.plugins.boot_concurrency)
                .unwrap_or(4)
                .max(1),
            gate_exempt,
        };

        Self {
            data_dir,
            api_server,
            plugins,
        }
    }

    /// Path of the `SQLite` database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("dockyard"))
}
