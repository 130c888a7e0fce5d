use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the relay router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Signaling socket
        .route("/ws", get(handlers::ws_upgrade))
        // Session queries
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
