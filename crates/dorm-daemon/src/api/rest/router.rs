//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/identity", post(handlers::provision_identity))
        .route("/identity/resolve", post(handlers::resolve_identity))
        .route(
            "/:kind/reservations",
            get(handlers::list_reservations).post(handlers::create_reservation),
        )
        .route(
            "/:kind/reservations/mine",
            get(handlers::list_own_reservations),
        )
        .route(
            "/:kind/reservations/:id",
            delete(handlers::delete_reservation),
        );

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http());

    if server.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
