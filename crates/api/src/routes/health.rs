use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the node fleet health route.
pub fn router() -> Router<AppState> {
    Router::new().route("/nodes/health/", get(handlers::health::nodes_health))
}
