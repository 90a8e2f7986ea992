//! Dockyard - runtime plugin host
//!
//! This library provides the core functionality of the Dockyard host:
//! - Plugin manifest validation and host version compatibility
//! - Backend unit loading and live mounting of plugin HTTP handlers
//! - Frontend asset registration
//! - A lifecycle registry kept consistent with persisted enablement
//! - A request gate admitting only enabled plugins
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  HTTP API (axum)                     │
//! │   RequestGate  │  /plugin/...        │  fallback     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 PluginRegistry                       │
//! │  Manifest │ Version │ BackendLoader │ AssetMounts    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          PluginStore (SQLite plugin records)         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod plugins;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, PluginRecord, PluginRepo, PluginStore};
pub use error::{Error, Result};
pub use plugins::{
    BackendCatalog, BackendModule, PluginManifest, PluginRegistry, PluginRoute,
    SharedPluginRegistry,
};
