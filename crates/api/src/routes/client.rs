use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the client handshake route.
pub fn router() -> Router<AppState> {
    Router::new().route("/client/hello/", post(handlers::client::hello))
}
