//! Plugin administration REST endpoints
//!
//! Mounted at `/plugin`. Read endpoints serve the host frontend and are
//! public; enable/disable require the API key.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::auth::require_api_key;
use super::{ApiState, ErrorResponse, error_response};
use crate::Error;
use crate::plugins::assets::REMOTE_ENTRY_FILE;
use crate::plugins::discovery::resolve_within;
use crate::plugins::manifest::MANIFEST_FILE;
use crate::plugins::{ComponentDescriptor, PluginSummary, describe_component, plugin_dir, validate_manifest};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Enablement state after an enable/disable call
#[derive(Debug, Serialize)]
pub struct PluginStateResponse {
    pub id: String,
    pub enabled: bool,
    pub active: bool,
}

/// Map a crate error onto an HTTP error response
fn api_error(err: &Error) -> ApiError {
    let (status, code) = match err {
        Error::NotFound(_) | Error::AssetNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_manifest"),
        Error::IncompatibleVersion { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "incompatible_version")
        }
        Error::EntryNotFound(_) => (StatusCode::UNPROCESSABLE_ENTITY, "entry_not_found"),
        Error::LoadTimeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "load_timeout"),
        Error::LoadFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "load_failed"),
        Error::Inconsistent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (status, error_response(code, &err.to_string()))
}

/// Build plugin administration routes
pub fn router(state: Arc<ApiState>) -> Router {
    let mutations = Router::new()
        .route("/plugin/plugins/{id}/enable", post(enable_plugin))
        .route("/plugin/plugins/{id}/disable", post(disable_plugin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/plugin/plugins_list", get(list_plugins))
        .route("/plugin/plugins/{id}/manifest.json", get(plugin_manifest))
        .route("/plugin/plugins/{id}/remoteEntry.js", get(remote_entry))
        .route("/plugin/plugins/{id}/component/{name}", get(component))
        .merge(mutations)
        .with_state(state)
}

/// List active plugins with their computed routes
async fn list_plugins(State(state): State<Arc<ApiState>>) -> Json<Vec<PluginSummary>> {
    Json(state.registry.list_plugins().await)
}

/// Serve a plugin's `manifest.json`
async fn plugin_manifest(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let dir = plugin_dir(state.registry.plugins_root(), &id).map_err(|e| api_error(&e))?;
    serve_file(dir.join(MANIFEST_FILE), "application/json").await
}

/// Serve a plugin's module federation entry
///
/// Uses the manifest's declared `remote_entry`, falling back to
/// `remoteEntry.js` in the plugin root.
async fn remote_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let dir = plugin_dir(state.registry.plugins_root(), &id).map_err(|e| api_error(&e))?;

    let declared = tokio::fs::read_to_string(dir.join(MANIFEST_FILE))
        .await
        .ok()
        .and_then(|raw| validate_manifest(&raw).ok())
        .and_then(|manifest| manifest.frontend)
        .and_then(|frontend| frontend.module_federation)
        .and_then(|mf| mf.remote_entry)
        .and_then(|rel| resolve_within(&dir, &rel));

    let file = declared.unwrap_or_else(|| dir.join(REMOTE_ENTRY_FILE));
    serve_file(file, "application/javascript").await
}

/// Describe a plugin UI component
async fn component(
    State(state): State<Arc<ApiState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<ComponentDescriptor>, ApiError> {
    let dir = plugin_dir(state.registry.plugins_root(), &id).map_err(|e| api_error(&e))?;

    let descriptor = tokio::task::spawn_blocking(move || {
        let manifest = std::fs::read_to_string(dir.join(MANIFEST_FILE))
            .ok()
            .and_then(|raw| validate_manifest(&raw).ok());
        describe_component(&dir, manifest.as_ref(), &name)
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_response("internal_error", &e.to_string()),
        )
    })?;

    Ok(Json(descriptor))
}

/// Enable a plugin and load it
async fn enable_plugin(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<PluginStateResponse>, ApiError> {
    state
        .registry
        .enable_plugin(&id)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(PluginStateResponse {
        active: state.registry.is_active(&id).await,
        enabled: true,
        id,
    }))
}

/// Disable a plugin and unload it
async fn disable_plugin(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<PluginStateResponse>, ApiError> {
    state
        .registry
        .disable_plugin(&id)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(PluginStateResponse {
        active: state.registry.is_active(&id).await,
        enabled: false,
        id,
    }))
}

async fn serve_file(path: PathBuf, content_type: &'static str) -> Result<Response, ApiError> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(api_error(&Error::AssetNotFound(path))),
        Err(e) => Err(api_error(&Error::Io(e))),
    }
}
