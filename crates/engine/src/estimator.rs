//! Per-provider waiting-time estimation.

use std::collections::HashMap;
use std::sync::Arc;

use easel_core::meta::PublicMetaInfo;
use easel_core::task::TaskSpec;
use easel_core::types::TaskId;

/// Fallback estimate until a measured model is plugged in.
const DEFAULT_TASK_TIME_MS: u64 = 4;

/// Predicts how long a task will occupy a provider, in milliseconds.
///
/// The provider's advertised capabilities are part of the input so a model
/// learned from MetaInfo/benchmark data can replace [`FixedTimeModel`]
/// without touching any call site.
pub trait TaskTimeModel: Send + Sync {
    fn estimate(&self, task: &TaskSpec, meta: &PublicMetaInfo) -> u64;
}

/// Flat estimate for every task.
pub struct FixedTimeModel(pub u64);

impl Default for FixedTimeModel {
    fn default() -> Self {
        Self(DEFAULT_TASK_TIME_MS)
    }
}

impl TaskTimeModel for FixedTimeModel {
    fn estimate(&self, _task: &TaskSpec, _meta: &PublicMetaInfo) -> u64 {
        self.0
    }
}

/// Running account of the work queued on one provider.
///
/// Tracks an estimate per in-flight task and keeps their sum as the
/// provider's waiting time, which feeds the dispatcher's scoring.
pub struct ProviderEstimator {
    model: Arc<dyn TaskTimeModel>,
    estimates: HashMap<TaskId, u64>,
    total_ms: u64,
}

impl ProviderEstimator {
    pub fn new(model: Arc<dyn TaskTimeModel>) -> Self {
        Self {
            model,
            estimates: HashMap::new(),
            total_ms: 0,
        }
    }

    /// Sum of the estimates of every tracked task, in milliseconds.
    pub fn waiting_time_ms(&self) -> u64 {
        self.total_ms
    }

    /// Estimate one task against the provider's current capabilities.
    pub fn estimate_task_time(&self, task: &TaskSpec, meta: &PublicMetaInfo) -> u64 {
        self.model.estimate(task, meta)
    }

    /// Start tracking a task. Adding the same task twice is a logged no-op.
    pub fn add_task(&mut self, task: &TaskSpec, meta: &PublicMetaInfo) {
        if self.estimates.contains_key(&task.id) {
            tracing::warn!(task_id = %task.id, "estimator already tracks task");
            return;
        }
        let estimate = self.model.estimate(task, meta);
        self.estimates.insert(task.id.clone(), estimate);
        self.total_ms += estimate;
    }

    /// Stop tracking a task. Removing an unknown task is a logged no-op.
    pub fn remove_task(&mut self, task_id: &TaskId) {
        match self.estimates.remove(task_id) {
            Some(estimate) => self.total_ms -= estimate,
            None => {
                tracing::warn!(task_id = %task_id, "estimator does not track task");
            }
        }
    }

    /// Drop every tracked task.
    pub fn clear(&mut self) {
        self.estimates.clear();
        self.total_ms = 0;
    }
}
