//! Bearer key guard for plugin lifecycle endpoints
//!
//! Only enabling and disabling plugins is guarded; listings and frontend
//! files stay public for the host UI.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{ApiState, error_response};

/// Admin key carried as `Authorization: Bearer <key>`
fn bearer_key(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        error_response("unauthorized", "plugin administration requires the admin key"),
    )
        .into_response()
}

/// Reject plugin enable/disable calls without the configured admin key
///
/// With no key configured, lifecycle changes are open to anyone who can
/// reach the host.
pub async fn require_api_key(State(state): State<Arc<ApiState>>, req: Request, next: Next) -> Response {
    let Some(admin_key) = &state.api_key else {
        tracing::warn!(path = %req.uri().path(), "no admin key configured, plugin lifecycle change allowed");
        return next.run(req).await;
    };

    match bearer_key(&req) {
        Some(key) if key == admin_key => next.run(req).await,
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "plugin lifecycle change with wrong admin key");
            unauthorized()
        }
        None => {
            tracing::debug!(path = %req.uri().path(), "plugin lifecycle change without admin key");
            unauthorized()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_key_parsing() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_key(&req), None);

        req.headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_key(&req), None);

        req.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer dock-admin"),
        );
        assert_eq!(bearer_key(&req), Some("dock-admin"));
    }
}
