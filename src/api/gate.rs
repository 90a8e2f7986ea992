//! Request gate for plugin namespaces
//!
//! Requests under `/api/v{N}/plugins/{id}/...` are admitted only while the
//! plugin's persisted record is enabled. The record is consulted on every
//! request, so a disable takes effect immediately even if unloading lags.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::error_response;
use crate::db::PluginStore;

/// Message returned for every rejected plugin request
pub const REJECTION_MESSAGE: &str = "plugin not found or not enabled";

/// Per-request plugin enablement check
pub struct RequestGate {
    store: Arc<dyn PluginStore>,
    exempt: Vec<String>,
}

impl RequestGate {
    #[must_use]
    pub fn new(store: Arc<dyn PluginStore>, exempt: Vec<String>) -> Self {
        Self { store, exempt }
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    /// Whether a request for `path` may proceed
    ///
    /// Store failures reject the request.
    #[must_use]
    pub fn admits(&self, path: &str) -> bool {
        if self.is_exempt(path) {
            return true;
        }
        plugin_namespace(path).is_none_or(|id| self.is_enabled(id))
    }

    /// Whether handlers owned by plugin `owner` may answer a request for
    /// `path`
    ///
    /// Applies to every mounted prefix, including custom `api_prefix`
    /// values outside the `/api/v{N}/plugins/{id}` namespace.
    #[must_use]
    pub fn admits_owner(&self, path: &str, owner: &str) -> bool {
        self.is_exempt(path) || self.is_enabled(owner)
    }

    /// Persisted enablement of plugin `id`, false on any lookup failure
    fn is_enabled(&self, id: &str) -> bool {
        match self.store.get(id) {
            Ok(Some(record)) if record.enabled => true,
            Ok(Some(_)) => {
                tracing::debug!(plugin_id = %id, "request for disabled plugin rejected");
                false
            }
            Ok(None) => {
                tracing::debug!(plugin_id = %id, "request for unknown plugin rejected");
                false
            }
            Err(e) => {
                tracing::warn!(plugin_id = %id, error = %e, "plugin lookup failed, rejecting request");
                false
            }
        }
    }
}

/// Response sent for every rejected plugin request
#[must_use]
pub fn rejection() -> Response {
    (
        StatusCode::NOT_FOUND,
        error_response("plugin_unavailable", REJECTION_MESSAGE),
    )
        .into_response()
}

/// Plugin id of a `/api/v{N}/plugins/{id}/...` path
#[must_use]
pub fn plugin_namespace(path: &str) -> Option<&str> {
    let mut segments = path.strip_prefix('/')?.split('/');

    if segments.next()? != "api" {
        return None;
    }
    let version = segments.next()?;
    let is_version = version
        .strip_prefix('v')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if !is_version || segments.next()? != "plugins" {
        return None;
    }

    segments.next()
}

/// Middleware rejecting requests for plugins that are not enabled
pub async fn request_gate(
    State(gate): State<Arc<RequestGate>>,
    req: Request,
    next: Next,
) -> Response {
    if gate.admits(req.uri().path()) {
        return next.run(req).await;
    }
    rejection()
}
