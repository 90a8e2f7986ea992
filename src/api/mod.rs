//! HTTP API server for Dockyard

mod auth;
pub mod gate;
pub mod health;
pub mod plugins;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::db::DbPool;
use crate::plugins::{Dispatch, SharedPluginRegistry};

pub use gate::RequestGate;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub api_key: Option<String>,
    pub registry: SharedPluginRegistry,
    pub gate: Arc<RequestGate>,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

pub(crate) fn error_response(code: &str, message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    registry: SharedPluginRegistry,
    api_key: Option<String>,
    port: u16,
    static_dir: Option<PathBuf>,
    gate_exempt: Vec<String>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub const fn new(db: DbPool, registry: SharedPluginRegistry, port: u16) -> Self {
        Self {
            db,
            registry,
            api_key: None,
            port,
            static_dir: None,
            gate_exempt: Vec::new(),
        }
    }

    /// Require this bearer key on administrative mutations
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Serve a host frontend from this directory for unmatched paths
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Path prefixes the request gate never inspects
    #[must_use]
    pub fn gate_exempt(mut self, prefixes: Vec<String>) -> Self {
        self.gate_exempt = prefixes;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let gate = Arc::new(RequestGate::new(self.registry.store(), self.gate_exempt));
        let state = Arc::new(ApiState {
            db: self.db,
            api_key: self.api_key,
            registry: self.registry,
            gate,
            static_dir: self.static_dir,
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    ///
    /// Anything the fixed routes do not match is dispatched to mounted plugin
    /// handlers, then plugin assets, then the static frontend.
    #[must_use]
    pub fn router(&self) -> Router {
        if let Some(static_dir) = &self.state.static_dir {
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let router = Router::new()
            .fallback(dispatch)
            .with_state(self.state.clone())
            .merge(plugins::router(self.state.clone()))
            .merge(health::router(self.state.clone()))
            .merge(health::ready_router(self.state.clone()));

        // Gate plugin namespaces on persisted enablement
        let router = router.layer(axum::middleware::from_fn_with_state(
            Arc::clone(&self.state.gate),
            gate::request_gate,
        ));

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// Fallback for paths no fixed route matches
async fn dispatch(State(state): State<Arc<ApiState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let admit = |owner: &str| state.gate.admits_owner(&path, owner);
    let req = match state.registry.routes().dispatch(req, admit).await {
        Dispatch::Served(response) => return response,
        Dispatch::Refused(_) => return gate::rejection(),
        Dispatch::Unmatched(req) => req,
    };
    let req = match state.registry.assets().dispatch(req).await {
        Ok(response) => return response,
        Err(req) => req,
    };

    match &state.static_dir {
        Some(static_dir) => {
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));
            let Ok(response) = serve_dir.oneshot(req).await;
            response.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
