use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::handlers::authorize;
use crate::state::AppState;

/// Request body for the hello handshake.
#[derive(Debug, Deserialize)]
pub struct HelloRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Hello handshake response: where to submit tasks.
#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub ok: bool,
    pub url: &'static str,
}

/// POST /v1/client/hello/ -- token check and submission URL discovery.
pub async fn hello(
    State(state): State<AppState>,
    Json(input): Json<HelloRequest>,
) -> ApiResult<Json<HelloResponse>> {
    authorize(&state, input.token.as_deref())?;

    Ok(Json(HelloResponse {
        ok: true,
        url: "/v1/tasks/",
    }))
}
