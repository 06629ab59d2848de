//! In-process engine event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EngineEvents`] is the single delivery path for task resolution: every
//! task produces exactly one [`EngineEvent::TaskResolved`], and persistence,
//! long-polling HTTP handlers, and tests all observe it as independent
//! subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;

use easel_core::status::TaskStatusPayload;
use easel_core::task::TaskResult;
use easel_core::types::{ProviderId, TaskId};

use crate::task::Task;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskResult),
    Failed { reason: String },
    Aborted,
}

/// Events published by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A task reached a terminal state. Published exactly once per task.
    TaskResolved {
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    /// A provider joined the registry.
    ProviderRegistered { provider_id: ProviderId },
    /// A provider left the registry.
    ProviderRemoved { provider_id: ProviderId },
}

/// Internal provider-to-dispatcher notifications.
///
/// Sent on an unbounded mpsc channel and consumed by the dispatcher's
/// signal loop, which serializes the reactions.
#[derive(Debug)]
pub(crate) enum ProviderSignal {
    /// Queue length or metadata changed; the market minimum needs a refresh.
    Updated { provider_id: ProviderId },
    /// The provider's grace period expired or its transport broke down;
    /// evict it and reschedule whatever it still holds.
    Closed { provider_id: ProviderId },
}

/// In-process fan-out bus for [`EngineEvent`]s.
#[derive(Clone)]
pub struct EngineEvents {
    sender: broadcast::Sender<EngineEvent>,
}

impl EngineEvents {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Move a task to a terminal state and publish its resolution.
    ///
    /// The task's own terminal-state guard makes this exactly-once: a second
    /// resolution attempt does not change the task, publishes nothing, and
    /// returns `false`.
    pub(crate) fn resolve(
        &self,
        task: &Arc<Task>,
        payload: TaskStatusPayload,
        outcome: TaskOutcome,
    ) -> bool {
        if !task.set_status(payload) {
            return false;
        }
        self.publish(EngineEvent::TaskResolved {
            task_id: task.id().clone(),
            outcome,
        });
        true
    }
}

impl Default for EngineEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
