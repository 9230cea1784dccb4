pub mod config;
pub mod device;
pub mod errors;
pub mod http;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Assemble the gateway's full surface: the device/dashboard WebSocket
/// endpoint plus the core-facing REST surface (§4.4).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/series/{node_id}", get(http::series::get_series))
        .route("/api/latest/{node_id}", get(http::series::get_latest))
        .route("/api/sync/{node_id}", get(http::series::get_sync))
        .route("/api/nodes", get(http::nodes::list_nodes))
        .route("/api/metrics/{node_id}", get(http::metrics::get_metrics))
        .route("/api/command/{node_id}", post(http::command::post_command))
        .route("/health", get(http::health::health))
        .route("/api/ingester/health", get(http::health::ingester_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
