use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Node fleet health payload.
#[derive(Debug, Serialize)]
pub struct NodesHealthResponse {
    pub ok: bool,
    /// Providers currently registered (online or within their grace period).
    pub providers: usize,
}

/// GET /v1/nodes/health/ -- 200 when at least one provider is registered,
/// 500 otherwise so load balancers can route around an empty fleet.
pub async fn nodes_health(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.dispatcher.provider_count();
    let status = if providers > 0 {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(NodesHealthResponse {
            ok: providers > 0,
            providers,
        }),
    )
}
