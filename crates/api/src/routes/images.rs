use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the synchronous generation route.
pub fn router() -> Router<AppState> {
    Router::new().route("/images/generation/", post(handlers::images::generate))
}
