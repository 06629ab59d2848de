use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount task submission and inspection routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/",
            post(handlers::tasks::submit_task).get(handlers::tasks::list_tasks),
        )
        .route(
            "/tasks/{task_id}",
            get(handlers::tasks::get_task).delete(handlers::tasks::abort_task),
        )
}
