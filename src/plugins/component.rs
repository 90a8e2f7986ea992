//! UI component descriptors served to the host frontend

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::manifest::PluginManifest;

static TEMPLATE_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<template[^>]*>(.*?)</template>").expect("valid regex"));

static SCRIPT_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<script[^>]*>(.*?)</script>").expect("valid regex"));

/// Descriptor of a plugin UI component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Render function source
    pub render: String,
}

/// Whether `name` is safe to use as a component file stem
#[must_use]
pub fn is_valid_component_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Describe component `name` of the plugin in `dir`
///
/// Reads `frontend/components/{name}.vue` when present. A component listed in
/// the manifest without a file gets a default render; anything else gets a
/// placeholder. Performs blocking filesystem access.
#[must_use]
pub fn describe_component(
    dir: &Path,
    manifest: Option<&PluginManifest>,
    name: &str,
) -> ComponentDescriptor {
    if !is_valid_component_name(name) {
        return unknown_component(name);
    }

    let file = dir.join("frontend").join("components").join(format!("{name}.vue"));
    if let Ok(source) = std::fs::read_to_string(&file) {
        return ComponentDescriptor {
            template: extract_section(&source, &TEMPLATE_SECTION),
            script: extract_section(&source, &SCRIPT_SECTION),
            render: render_fn(name, "Loaded from component file"),
        };
    }

    let listed = manifest.is_some_and(|m| m.components.iter().any(|c| c == name));
    if listed {
        return ComponentDescriptor {
            template: None,
            script: None,
            render: render_fn(name, &format!("Default implementation of {name}")),
        };
    }

    tracing::debug!(dir = %dir.display(), component = %name, "unknown component requested");
    unknown_component(name)
}

fn unknown_component(name: &str) -> ComponentDescriptor {
    let shown: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    ComponentDescriptor {
        template: None,
        script: None,
        render: format!(
            "function(h) {{ return h('div', {{ class: 'error-component' }}, [\
             h('h2', 'Unknown component'), \
             h('p', 'Component not found: {shown}')]); }}"
        ),
    }
}

fn render_fn(name: &str, content: &str) -> String {
    format!(
        "function(h) {{ return h('div', {{ class: 'plugin-component' }}, [\
         h('h2', '{name}'), \
         h('div', {{ class: 'component-content' }}, '{content}')]); }}"
    )
}

/// Inner text of the first block `section` matches in a single-file component
fn extract_section(source: &str, section: &Regex) -> Option<String> {
    section
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
