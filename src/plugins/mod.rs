//! Plugin system for Dockyard
//!
//! Plugins live in one directory each under the plugins root and are
//! described by a `manifest.json`. A plugin may contribute a backend unit
//! (HTTP handlers mounted under the host API base) and frontend assets
//! (static files and a module federation entry). The [`PluginRegistry`]
//! owns their lifecycle.

pub mod assets;
pub mod component;
pub mod discovery;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod routing;
pub mod version;

pub use assets::{AssetMounts, AssetTarget, plan_frontend_assets};
pub use component::{ComponentDescriptor, describe_component};
pub use discovery::{discover_plugins, plugin_dir, read_manifest};
pub use loader::{BackendCatalog, BackendContext, BackendExport, BackendModule, PluginRoute};
pub use manifest::{PluginManifest, RouteDescriptor, validate_manifest};
pub use registry::{
    ActivePluginEntry, BootReport, PluginRegistry, PluginState, PluginSummary, ReconcileReport,
    RegistryOptions, SharedPluginRegistry,
};
pub use routing::{Dispatch, RouteTable};
pub use version::{check_compatibility, parse_host_version};
