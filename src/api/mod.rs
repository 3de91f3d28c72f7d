// HTTP surface: gate middleware, permission middleware and the cache endpoints

use axum::{
    Extension, Router,
    body::Body,
    extract::{MatchedPath, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{AuthContext, AuthenticationGate, GateRequest};
use crate::cache::CacheInvalidator;
use crate::permission::PermissionMatrix;

/// Largest request body the gate will buffer for signature checks.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthenticationGate>,
    pub permissions: Arc<PermissionMatrix>,
    pub invalidator: CacheInvalidator,
}

impl AppState {
    pub fn new(
        gate: Arc<AuthenticationGate>,
        permissions: Arc<PermissionMatrix>,
        invalidator: CacheInvalidator,
    ) -> Self {
        Self {
            gate,
            permissions,
            invalidator,
        }
    }
}

/// Permission key for a route pattern: leading `/` removed and `{param}`
/// segments dropped, so `/1/posts/{id}` becomes `1/posts`.
pub fn endpoint_key_for(route: &str) -> String {
    route
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty() && !segment.starts_with('{'))
        .collect::<Vec<_>>()
        .join("/")
}

/// Routes behind the gate only.
pub fn authenticated(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
}

/// Routes behind the gate and the permission matrix. `routes` must not be
/// empty.
pub fn protected(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    routes
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
}

pub fn create_router(state: AppState) -> Router {
    create_router_with(state, Router::new())
}

/// The gate's own routes plus `downstream`, which is mounted behind the gate
/// and the permission matrix.
pub fn create_router_with(state: AppState, downstream: Router<AppState>) -> Router {
    let context = Router::new().route("/1/auth/context", get(auth_context));
    let admin = Router::new()
        .route("/1/cache/members/{user_id}", delete(clear_member_cache))
        .route("/1/cache/ng-words", delete(clear_ng_words_cache));

    Router::new()
        .route("/health", get(health_check))
        .merge(authenticated(&state, context))
        .merge(protected(&state, admin.merge(downstream)))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the gate, then hand the request on with its body intact and the
/// [`AuthContext`] in its extensions.
async fn authenticate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let outcome = {
        let gate_request = GateRequest {
            method: parts.method.as_str(),
            path: parts.uri.path(),
            query: parts.uri.query(),
            headers: &parts.headers,
            body: &bytes,
        };
        state.gate.authenticate(&gate_request).await
    };

    match outcome {
        Ok(ctx) => {
            parts.extensions.insert(ctx);
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        Err(denial) => denial.error.into_response(),
    }
}

async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(denied) = permission_denial(&state, &request) {
        return denied;
    }

    next.run(request).await
}

fn permission_denial(state: &AppState, request: &Request) -> Option<Response> {
    let Some(ctx) = request.extensions().get::<AuthContext>() else {
        error!("permission check reached without an auth context");
        return Some(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    };

    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str())
        .unwrap_or_else(|| request.uri().path());
    let key = endpoint_key_for(route);

    let e = state
        .permissions
        .check(ctx.role(), &key, request.method().as_str())
        .err()?;

    warn!(
        tenant_id = %ctx.tenant_id(),
        role = %ctx.role(),
        endpoint = %key,
        method = %request.method(),
        "permission denied"
    );
    Some(e.into_response())
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn auth_context(Extension(ctx): Extension<AuthContext>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "tenant_id": ctx.tenant_id(),
            "user_id": ctx.user_id(),
            "role": ctx.role(),
        }
    }))
}

async fn clear_member_cache(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state
        .invalidator
        .clear_member(ctx.tenant(), user_id)
        .await
        .map_err(|e| {
            error!(error = %e, "member cache invalidation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::NO_CONTENT)
}

async fn clear_ng_words_cache(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, StatusCode> {
    state
        .invalidator
        .clear_ng_words(ctx.tenant())
        .await
        .map_err(|e| {
            error!(error = %e, "NG word cache invalidation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::NO_CONTENT)
}
