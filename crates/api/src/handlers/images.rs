use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tokio::sync::broadcast;

use easel_core::types::TaskId;
use easel_engine::{EngineEvent, TaskOutcome};

use crate::error::{ApiError, ApiResult};
use crate::handlers::tasks::{admit_task, SubmitTaskRequest};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub ok: bool,
    pub result: GenerationResult,
}

/// Result payload of a finished generation.
#[derive(Debug, Serialize)]
pub struct GenerationResult {
    pub images: Vec<String>,
}

/// POST /v1/images/generation/ -- submit a task and wait for its result.
///
/// Long-polls the engine event bus for this task's resolution and gives up
/// with 504 after `task_wait_secs`. The subscription is taken before the
/// task is admitted so a fast resolution cannot slip between the two.
pub async fn generate(
    State(state): State<AppState>,
    Json(input): Json<SubmitTaskRequest>,
) -> ApiResult<Json<GenerationResponse>> {
    let mut events = state.dispatcher.subscribe();
    let task = admit_task(&state, input).await?;

    let deadline = Duration::from_secs(state.config.task_wait_secs);
    match wait_for_resolution(&mut events, task.id(), deadline).await? {
        TaskOutcome::Completed(result) => Ok(Json(GenerationResponse {
            ok: true,
            result: GenerationResult {
                images: result.images,
            },
        })),
        TaskOutcome::Failed { reason } => Err(ApiError::TaskFailed(reason)),
        TaskOutcome::Aborted => Err(ApiError::TaskFailed("task was aborted".to_string())),
    }
}

/// Wait until the bus announces this task's resolution.
async fn wait_for_resolution(
    events: &mut broadcast::Receiver<EngineEvent>,
    task_id: &TaskId,
    deadline: Duration,
) -> Result<TaskOutcome, ApiError> {
    let resolution = async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::TaskResolved {
                    task_id: resolved,
                    outcome,
                }) if &resolved == task_id => return Some(outcome),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // The dropped events may include this task's resolution;
                    // the timeout below bounds the wait either way.
                    tracing::warn!(task_id = %task_id, missed, "event bus lagged during long-poll");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };

    match tokio::time::timeout(deadline, resolution).await {
        Ok(Some(outcome)) => Ok(outcome),
        Ok(None) => Err(ApiError::InternalError(
            "engine event bus closed".to_string(),
        )),
        Err(_) => Err(ApiError::ResultTimeout),
    }
}
