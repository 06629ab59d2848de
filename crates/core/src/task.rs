use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pricing::{DEFAULT_MAX_COST, DEFAULT_TIME_TO_MONEY_RATIO};
use crate::types::{new_task_id, TaskId};

/// Options for the built-in text-to-image pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardPipelineOptions {
    pub prompt: String,
    pub model: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
}

/// Options for a user-supplied ComfyUI pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComfyPipelineOptions {
    /// Serialized pipeline graph, forwarded to the node untouched.
    pub pipeline_data: String,
    /// Dependencies referenced by the graph (models, custom nodes).
    #[serde(default)]
    pub pipeline_dependencies: Option<Value>,
}

/// Pipeline selection for one task.
///
/// At least one pipeline must be present; see
/// [`validate_task_options`](crate::validation::validate_task_options).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[serde(default)]
    pub standard_pipeline: Option<StandardPipelineOptions>,
    #[serde(default)]
    pub comfy_pipeline: Option<ComfyPipelineOptions>,
}

/// Immutable submission data for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Most the submitter is willing to pay for this task.
    pub max_cost: u32,
    /// How much one millisecond of waiting costs the submitter.
    pub time_to_money_ratio: f64,
    pub options: TaskOptions,
}

impl TaskSpec {
    /// Build a spec with a fresh id.
    pub fn new(max_cost: u32, time_to_money_ratio: f64, options: TaskOptions) -> Self {
        Self {
            id: new_task_id(),
            max_cost,
            time_to_money_ratio,
            options,
        }
    }

    /// Build a spec with a caller-chosen id.
    pub fn with_id(
        id: impl Into<TaskId>,
        max_cost: u32,
        time_to_money_ratio: f64,
        options: TaskOptions,
    ) -> Self {
        Self {
            id: id.into(),
            max_cost,
            time_to_money_ratio,
            options,
        }
    }
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_COST,
            DEFAULT_TIME_TO_MONEY_RATIO,
            TaskOptions::default(),
        )
    }
}

/// Result payload reported by a provider node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// URLs of the generated images.
    pub images: Vec<String>,
}

/// Client-facing projection of the detailed task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicTaskStatus {
    Pending,
    Success,
    Failure,
}
