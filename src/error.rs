//! Error types for Dockyard

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Dockyard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Dockyard
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Resource not found (unknown plugin id, missing record)
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed plugin manifest
    #[error("invalid manifest: {0}")]
    Validation(String),

    /// Plugin requires a host core version this host does not satisfy
    #[error("incompatible core version (requires {required}, host is {current})")]
    IncompatibleVersion { required: String, current: String },

    /// Declared backend entry file is missing
    #[error("backend entry not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    /// Declared frontend asset is missing
    #[error("asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    /// Unexpected failure inside the load pipeline
    #[error("plugin load failed: {id}: {reason}")]
    LoadFailed { id: String, reason: String },

    /// Backend unit did not finish loading in time
    #[error("plugin load timed out after {timeout:?}: {id}")]
    LoadTimeout { id: String, timeout: Duration },

    /// Persisted plugin state and loaded state disagree
    #[error("registry inconsistent: {0}")]
    Inconsistent(String),
}
