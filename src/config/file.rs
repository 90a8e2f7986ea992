//! TOML configuration file loading
//!
//! Supports `~/.config/dockyard/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DockyardConfigFile {
    /// Data directory (database lives here)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Plugin runtime configuration
    #[serde(default)]
    pub plugins: PluginsFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP port
    pub port: Option<u16>,

    /// Static web UI directory
    pub static_dir: Option<PathBuf>,
}

/// Plugin runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct PluginsFileConfig {
    /// Plugins root directory
    pub dir: Option<PathBuf>,

    /// Host core version plugins are checked against
    pub core_version: Option<String>,

    /// Prefix every plugin API prefix is mounted below
    pub api_base: Option<String>,

    pub load_timeout_secs: Option<u64>,

    pub boot_concurrency: Option<usize>,

    /// Path prefixes the request gate never inspects
    #[serde(default)]
    pub gate_exempt: Vec<String>,
}

/// Load the config file from the standard location
///
/// Returns defaults if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> DockyardConfigFile {
    let Some(path) = config_file_path() else {
        return DockyardConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load the config file at `path`, falling back to defaults
#[must_use]
pub fn load_config_file_from(path: &Path) -> DockyardConfigFile {
    if !path.exists() {
        return DockyardConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                DockyardConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file, using defaults"
            );
            DockyardConfigFile::default()
        }
    }
}

/// Standard config file location
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("dockyard").join("config.toml"))
}
