//! HTTP route handlers for `PassVault`.
//!
//! Routes are organized by subsystem:
//! - `sys`: health check (public)
//! - `tracks`: listing and administering tracked attempts
//! - `export`: XML export, verification, import and download
//! - `backup`: JSON database dumps

pub mod backup;
pub mod export;
pub mod sys;
pub mod tracks;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::admin_guard;
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Everything but health goes through the throttled admin guard.
    let guarded_routes = Router::new()
        .nest("/v1/sys/tracks", tracks::router())
        .nest(
            "/v1/export",
            export::router(Arc::clone(&state.export_permits)),
        )
        .nest("/v1/backup", backup::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            admin_guard,
        ));

    Router::new()
        .nest("/v1/sys", sys::router())
        .merge(guarded_routes)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
