pub mod client;
pub mod health;
pub mod images;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /client/hello/        token check + submission URL (POST)
///
/// /tasks/               submit (POST), list own tasks (GET)
/// /tasks/{task_id}      status/result (GET), abort (DELETE)
///
/// /images/generation/   submit and wait for the result (POST)
///
/// /nodes/health/        fleet health (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(client::router())
        .merge(tasks::router())
        .merge(images::router())
        .merge(health::router())
}
