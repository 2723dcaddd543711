use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, root, stats};
use super::metrics::prometheus_metrics;
use super::rooms::{get_room, list_rooms};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Room inspection
        .nest(
            "/api/v1",
            Router::new()
                .route("/rooms", get(list_rooms))
                .route("/rooms/{room_id}", get(get_room)),
        )
}
