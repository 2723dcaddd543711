//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod rooms;
mod routes;

pub use health::{health, root, stats};
pub use metrics::prometheus_metrics;
pub use rooms::{get_room, list_rooms};
pub use routes::api_routes;
