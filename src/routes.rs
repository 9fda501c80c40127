//! Route definitions and router construction: the websocket upgrades and
//! the admin JSON surface, mounted on one process-wide router.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::call::call_ws_handler;
use crate::proxy::proxy_ws_handler;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy", get(proxy_ws_handler))
        .route("/call", get(call_ws_handler))
        .route("/admin/proxy/status", get(admin::proxy_status))
        .route("/admin/proxy/cleanup", post(admin::proxy_cleanup))
        .route("/admin/call/status", get(admin::call_status))
        .route("/admin/call/cleanup", post(admin::call_cleanup))
        .route("/admin/call/status/{call_id}", get(admin::call_session_status))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state)
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
