use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use easel_core::error::CoreError;
use easel_core::pricing::{self, DEFAULT_MAX_COST, DEFAULT_TIME_TO_MONEY_RATIO};
use easel_core::task::{PublicTaskStatus, TaskOptions, TaskSpec};
use easel_core::types::TaskId;
use easel_core::validation::validate_task_options;
use easel_engine::Task;
use easel_storage::TaskData;

use crate::error::{ApiError, ApiResult};
use crate::handlers::authorize;
use crate::state::AppState;

/// Task submission body. Pipeline options keep their wire names
/// (`standardPipeline` / `comfyPipeline`).
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub max_cost: Option<u32>,
    #[serde(default)]
    pub time_to_money_ratio: Option<f64>,
    #[serde(flatten)]
    pub options: TaskOptions,
}

/// Token carried in the query string of GET/DELETE requests.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub ok: bool,
    pub message: &'static str,
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub ok: bool,
    pub tasks: Vec<TaskData>,
}

#[derive(Debug, Serialize)]
pub struct TaskViewResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub task: TaskData,
}

#[derive(Debug, Serialize)]
pub struct AbortTaskResponse {
    pub ok: bool,
    pub task_id: TaskId,
    pub status: PublicTaskStatus,
}

/// Validate a submission, store the task, and hand it to the dispatcher.
///
/// Placement runs in a spawned task so the HTTP response does not wait on
/// provider selection; callers that do want to wait subscribe to the engine
/// event bus before calling this.
pub(crate) async fn admit_task(
    state: &AppState,
    input: SubmitTaskRequest,
) -> ApiResult<Arc<Task>> {
    let user = authorize(state, input.token.as_deref())?;
    validate_task_options(&input.options)?;

    let Some(market_min) = state.dispatcher.min_cost() else {
        return Err(ApiError::Unavailable("no nodes available".to_string()));
    };
    let max_cost = input.max_cost.unwrap_or(DEFAULT_MAX_COST);
    if !pricing::accepts_cost(market_min, max_cost) {
        return Err(ApiError::BadRequest(format!(
            "max_cost {max_cost} is below the market minimum {market_min}"
        )));
    }

    let spec = TaskSpec::new(
        max_cost,
        input
            .time_to_money_ratio
            .unwrap_or(DEFAULT_TIME_TO_MONEY_RATIO),
        input.options,
    );
    let task = Task::new(spec);
    state.store.add_task(user, Arc::clone(&task));

    let dispatcher = Arc::clone(&state.dispatcher);
    let placed = Arc::clone(&task);
    tokio::spawn(async move {
        if let Err(error) = dispatcher.add_task(&placed).await {
            tracing::warn!(task_id = %placed.id(), %error, "task placement failed");
        }
    });

    Ok(task)
}

/// POST /v1/tasks/ -- submit a task for asynchronous execution.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(input): Json<SubmitTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = admit_task(&state, input).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitTaskResponse {
            ok: true,
            message: "Task submitted successfully",
            task_id: task.id().clone(),
        }),
    ))
}

/// GET /v1/tasks/ -- every task this user has submitted, in submission order.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let user = authorize(&state, query.token.as_deref())?;

    Ok(Json(TaskListResponse {
        ok: true,
        tasks: state.store.get_tasks(user),
    }))
}

/// GET /v1/tasks/{task_id} -- status and result of one task, owner only.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<TaskViewResponse>> {
    let user = authorize(&state, query.token.as_deref())?;
    let task = state.store.get_task_data_with_verification(&task_id, user)?;

    Ok(Json(TaskViewResponse { ok: true, task }))
}

/// DELETE /v1/tasks/{task_id} -- abort one task, owner only.
///
/// Idempotent: aborting a task that already resolved leaves it alone and
/// answers with its final status.
pub async fn abort_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<AbortTaskResponse>> {
    let user = authorize(&state, query.token.as_deref())?;
    state.store.get_task_data_with_verification(&task_id, user)?;

    let Some(task) = state.store.task(&task_id) else {
        return Err(CoreError::NotFound {
            entity: "task",
            id: task_id,
        }
        .into());
    };
    state.dispatcher.abort_task(&task).await;

    Ok(Json(AbortTaskResponse {
        ok: true,
        task_id,
        status: task.status().public(),
    }))
}
