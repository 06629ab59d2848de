//! Event-bus subscriber that persists task results.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use easel_engine::{EngineEvent, TaskOutcome};

use crate::store::TaskStore;

/// Writes completed results into the [`TaskStore`].
///
/// Failures and aborts need no write: the stored task carries its own
/// status. Spawn [`ResultRecorder::run`] once next to the dispatcher.
pub struct ResultRecorder {
    store: Arc<TaskStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Consume resolutions until the bus closes.
    pub async fn run(self, mut events: Receiver<EngineEvent>) {
        loop {
            match events.recv().await {
                Ok(EngineEvent::TaskResolved {
                    task_id,
                    outcome: TaskOutcome::Completed(result),
                }) => {
                    tracing::debug!(task_id = %task_id, "recording task result");
                    self.store.add_result(&task_id, result);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "result recorder lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("result recorder stopped");
    }
}
