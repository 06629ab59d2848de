//! JSON frames exchanged with provider nodes.
//!
//! Inbound frames are tagged by `"type"`. Outbound task frames carry no tag;
//! the node treats any untagged frame as work.

use serde::{Deserialize, Serialize};

use easel_core::meta::PublicMetaInfo;
use easel_core::task::{ComfyPipelineOptions, StandardPipelineOptions, TaskSpec};
use easel_core::types::TaskId;

/// Messages a node sends to the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeMessage {
    /// Announce (or re-announce) this node to the marketplace.
    Register {
        node_id: String,
        metadata: PublicMetaInfo,
    },
    /// A task finished; the URLs point at the generated images.
    Result {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        #[serde(rename = "resultsUrl")]
        results_url: Vec<String>,
    },
    /// A task failed on the node.
    Error {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        error: String,
    },
}

/// Work frame sent to a node. An absent pipeline rides as `null`.
#[derive(Debug, Serialize)]
pub struct TaskFrame<'a> {
    #[serde(rename = "taskId")]
    pub task_id: &'a TaskId,
    pub options: Option<&'a StandardPipelineOptions>,
    #[serde(rename = "comfyOptions")]
    pub comfy_options: Option<&'a ComfyPipelineOptions>,
}

impl<'a> TaskFrame<'a> {
    pub fn from_spec(spec: &'a TaskSpec) -> Self {
        Self {
            task_id: &spec.id,
            options: spec.options.standard_pipeline.as_ref(),
            comfy_options: spec.options.comfy_pipeline.as_ref(),
        }
    }
}

/// Abort frame sent to a node.
#[derive(Debug, Serialize)]
pub struct AbortFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "taskId")]
    pub task_id: &'a TaskId,
}

impl<'a> AbortFrame<'a> {
    pub fn new(task_id: &'a TaskId) -> Self {
        Self {
            kind: "abort",
            task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    use easel_core::task::TaskOptions;

    #[test]
    fn parses_register_and_defaults_min_cost() {
        let message: NodeMessage = serde_json::from_value(json!({
            "type": "register",
            "node_id": "node-1",
            "metadata": { "models": ["sd15"], "gpu_type": "rtx4090", "ncpu": 8, "ram": 32 }
        }))
        .unwrap();

        assert_matches!(message, NodeMessage::Register { node_id, metadata } => {
            assert_eq!(node_id, "node-1");
            assert_eq!(metadata.min_cost, 10);
        });
    }

    #[test]
    fn parses_result_frame() {
        let message: NodeMessage = serde_json::from_value(json!({
            "type": "result",
            "taskId": "t-1",
            "resultsUrl": ["http://cdn/img-1.png", "http://cdn/img-2.png"]
        }))
        .unwrap();

        assert_matches!(message, NodeMessage::Result { task_id, results_url } => {
            assert_eq!(task_id, "t-1");
            assert_eq!(results_url.len(), 2);
        });
    }

    #[test]
    fn parses_error_frame() {
        let message: NodeMessage = serde_json::from_value(json!({
            "type": "error",
            "taskId": "t-1",
            "error": "CUDA out of memory"
        }))
        .unwrap();

        assert_matches!(message, NodeMessage::Error { task_id, error } => {
            assert_eq!(task_id, "t-1");
            assert_eq!(error, "CUDA out of memory");
        });
    }

    #[test]
    fn rejects_unknown_message_type() {
        let result = serde_json::from_value::<NodeMessage>(json!({
            "type": "status",
            "taskId": "t-1"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn task_frame_uses_wire_names_and_null_for_absent_pipelines() {
        let options: TaskOptions = serde_json::from_value(json!({
            "standardPipeline": { "prompt": "a red boat", "model": "sd15" }
        }))
        .unwrap();
        let spec = TaskSpec::with_id("t-7", 15, 1.0, options);

        let frame = serde_json::to_value(TaskFrame::from_spec(&spec)).unwrap();
        assert_eq!(
            frame,
            json!({
                "taskId": "t-7",
                "options": { "prompt": "a red boat", "model": "sd15", "size": null, "steps": null },
                "comfyOptions": null
            })
        );
    }

    #[test]
    fn comfy_task_frame_keeps_pipeline_data() {
        let options: TaskOptions = serde_json::from_value(json!({
            "comfyPipeline": {
                "pipelineData": "{\"nodes\":[]}",
                "pipelineDependencies": { "checkpoints": ["sd15"] }
            }
        }))
        .unwrap();
        let spec = TaskSpec::with_id("t-8", 15, 1.0, options);

        let frame = serde_json::to_value(TaskFrame::from_spec(&spec)).unwrap();
        assert_eq!(frame["options"], json!(null));
        assert_eq!(frame["comfyOptions"]["pipelineData"], "{\"nodes\":[]}");
    }

    #[test]
    fn abort_frame_is_tagged() {
        let task_id: TaskId = "t-9".into();
        assert_eq!(
            serde_json::to_value(AbortFrame::new(&task_id)).unwrap(),
            json!({ "type": "abort", "taskId": "t-9" })
        );
    }
}
