//! HTTP routes for the coordinator.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, RoomRegistryHandle};
use crate::chat::ChatService;
use crate::gateway;
use crate::handlers;
use crate::observability::HealthState;
use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

/// Application state shared across all handlers.
pub struct AppState {
    pub registry: RoomRegistryHandle,
    pub chat: Arc<ChatService>,
    pub health: Arc<HealthState>,
    pub metrics: Arc<ActorMetrics>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/ws` - Session protocol over WebSocket
/// - `/v1/groups...` and `/v1/notifications...` - Chat REST endpoints
/// - CORS for the configured origin
/// - TraceLayer for request logging
/// - 30 second request timeout on the REST routes
pub fn build_routes(state: Arc<AppState>, cors_origin: &str) -> Router {
    let api_routes = Router::new()
        .route("/v1/groups", post(handlers::create_group))
        .route("/v1/groups/:name/members", post(handlers::add_member))
        .route("/v1/groups/:name/messages", get(handlers::list_messages))
        .route(
            "/v1/notifications/:receiver_id",
            get(handlers::list_notifications).delete(handlers::delete_notification),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    // The socket outlives any request timeout.
    let ws_routes = Router::new().route("/ws", get(gateway::ws_handler));

    api_routes
        .merge(ws_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origin))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(
                target: "rtc.gateway",
                error = %e,
                "Invalid CORS origin, cross-origin requests will be refused"
            );
            layer
        }
    }
}
