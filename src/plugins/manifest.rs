//! Plugin manifest format (`manifest.json`)

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

/// Manifest file name inside every plugin directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Core version assumed when a manifest declares no requirement
pub const DEFAULT_CORE_REQUIREMENT: &str = "1.0.0";

const REQUIRED_FIELDS: [&str; 4] = ["id", "name", "version", "description"];

/// Plugin manifest describing a plugin's identity and entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier, `[a-z0-9-]+`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semver version string
    pub version: String,
    /// Short description
    pub description: String,
    /// Host requirements
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Backend entry point, absent for frontend-only plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendSection>,
    /// Frontend assets, absent for backend-only plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendSection>,
    /// UI component names
    #[serde(default, alias = "component", skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    /// Explicit route descriptors; listings emit the computed routes instead
    #[serde(default, skip_serializing)]
    pub routes: Option<Vec<RouteDescriptor>>,
}

/// Host requirements of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Minimum host core version
    #[serde(default = "default_core")]
    pub core: String,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            core: default_core(),
        }
    }
}

fn default_core() -> String {
    DEFAULT_CORE_REQUIREMENT.to_string()
}

/// Backend section of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSection {
    /// Entry file, relative to the plugin root
    #[serde(default)]
    pub entry: Option<String>,
    /// Mount point of the plugin's HTTP handlers below the host API base
    #[serde(default)]
    pub api_prefix: Option<String>,
}

/// Frontend section of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendSection {
    /// Public name the assets are mounted under
    #[serde(default)]
    pub entry: Option<String>,
    /// Static asset directory, relative to the plugin root
    #[serde(default)]
    pub assets_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_federation: Option<ModuleFederation>,
}

/// Module federation descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFederation {
    /// Remote entry script, relative to the plugin root
    #[serde(default)]
    pub remote_entry: Option<String>,
}

/// Frontend route exposed by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub path: String,
    pub name: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Whether `id` is a valid plugin slug (`^[a-z0-9-]+$`)
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Parse and structurally validate raw manifest content
///
/// Only the identity fields are checked; absent `backend`/`frontend` sections
/// are legal and simply skip the matching load phase.
///
/// # Errors
///
/// Returns `Error::Validation` if the content is not a JSON object, a
/// required field is missing or empty, or the id is not a slug
pub fn validate_manifest(raw: &str) -> Result<PluginManifest> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::Validation(format!("manifest is not valid JSON: {e}")))?;

    let Some(fields) = value.as_object() else {
        return Err(Error::Validation("manifest must be a JSON object".to_string()));
    };

    for field in REQUIRED_FIELDS {
        match fields.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {}
            _ => {
                return Err(Error::Validation(format!(
                    "missing required field: {field}"
                )));
            }
        }
    }

    let id = fields.get("id").and_then(Value::as_str).unwrap_or_default();
    if !is_valid_id(id) {
        return Err(Error::Validation(format!(
            "plugin id may only contain lowercase letters, digits and hyphens: {id:?}"
        )));
    }

    serde_json::from_value(value).map_err(|e| Error::Validation(e.to_string()))
}

impl PluginManifest {
    /// Backend mount point, defaulting to `/plugins/{id}`
    #[must_use]
    pub fn api_prefix(&self) -> String {
        self.backend
            .as_ref()
            .and_then(|b| b.api_prefix.clone())
            .map_or_else(|| format!("/plugins/{}", self.id), |p| normalize_prefix(&p))
    }

    /// Public frontend name, defaulting to the plugin id
    #[must_use]
    pub fn frontend_entry(&self) -> &str {
        self.frontend
            .as_ref()
            .and_then(|f| f.entry.as_deref())
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.id)
    }

    /// Routes shown to the host UI
    ///
    /// Explicit `routes` win; otherwise one route is synthesized per component.
    #[must_use]
    pub fn computed_routes(&self) -> Vec<RouteDescriptor> {
        if let Some(routes) = &self.routes {
            return routes.clone();
        }

        self.components
            .iter()
            .map(|component| self.synthesize_route(component))
            .collect()
    }

    fn synthesize_route(&self, component: &str) -> RouteDescriptor {
        let (segment, title, icon) = if component.ends_with("Records") {
            ("records".to_string(), "Records", "list")
        } else if component.ends_with("Settings") {
            ("settings".to_string(), "Settings", "settings")
        } else {
            (component.to_lowercase(), component, "plugin")
        };

        RouteDescriptor {
            path: format!("/plugins/{}/{segment}", self.id),
            name: format!("{}-{segment}", self.id),
            component: component.to_string(),
            meta: Some(json!({
                "title": format!("{} {title}", self.name),
                "icon": icon,
            })),
        }
    }
}

/// Ensure a leading slash and no trailing slash
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    format!("/{trimmed}")
}
