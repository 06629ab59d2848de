//! Shared task handle and its append-only status history.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use easel_core::status::{StatusLogEntry, TaskStatus, TaskStatusPayload};
use easel_core::task::TaskSpec;
use easel_core::types::{ProviderId, TaskId};

/// One dispatched task, shared across the dispatcher, providers, storage,
/// and transport as `Arc<Task>`.
///
/// All mutable state sits behind a single short-lived lock, so status
/// transitions per task are totally ordered and the history is strictly
/// append-only. Rescheduling reuses the same handle; a task is never cloned
/// into a second identity.
pub struct Task {
    spec: TaskSpec,
    state: Mutex<TaskState>,
}

struct TaskState {
    status: TaskStatus,
    provider_id: Option<ProviderId>,
    failed_attempts: u32,
    priority: i32,
    log: Vec<StatusLogEntry>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Arc<Self> {
        Arc::new(Self {
            spec,
            state: Mutex::new(TaskState {
                status: TaskStatus::Unscheduled,
                provider_id: None,
                failed_attempts: 0,
                priority: 0,
                log: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.spec.id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn max_cost(&self) -> u32 {
        self.spec.max_cost
    }

    pub fn time_to_money_ratio(&self) -> f64 {
        self.spec.time_to_money_ratio
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().expect("lock poisoned").status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Provider currently holding the task.
    ///
    /// Answers only while the task is assigned (scheduled, mid-send retry,
    /// or sent); the status log keeps the full assignment history.
    pub fn provider_id(&self) -> Option<ProviderId> {
        let state = self.state.lock().expect("lock poisoned");
        match state.status {
            TaskStatus::Scheduled | TaskStatus::SendFailed | TaskStatus::Sent => {
                state.provider_id.clone()
            }
            _ => None,
        }
    }

    /// Scheduling rounds this task has lost so far. The counter survives
    /// rescheduling, so a task bounced between dying providers eventually
    /// exhausts its budget.
    pub fn failed_attempts(&self) -> u32 {
        self.state.lock().expect("lock poisoned").failed_attempts
    }

    /// Record one lost scheduling round and return the new count.
    pub fn add_failed_attempt(&self) -> u32 {
        let mut state = self.state.lock().expect("lock poisoned");
        state.failed_attempts += 1;
        state.failed_attempts
    }

    pub fn priority(&self) -> i32 {
        self.state.lock().expect("lock poisoned").priority
    }

    pub fn set_priority(&self, priority: i32) {
        self.state.lock().expect("lock poisoned").priority = priority;
    }

    /// Append a transition to the history and update the derived status.
    ///
    /// Returns `false` without touching the task when it is already in a
    /// terminal state; terminal tasks are immutable.
    pub fn set_status(&self, payload: TaskStatusPayload) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.status.is_terminal() {
            tracing::warn!(
                task_id = %self.spec.id,
                status = %state.status,
                attempted = %payload,
                "status change on terminal task ignored",
            );
            return false;
        }

        state.status = payload.status();
        match &payload {
            TaskStatusPayload::Scheduled { provider_id, .. } => {
                state.provider_id = Some(provider_id.clone());
            }
            TaskStatusPayload::Unscheduled => {
                state.provider_id = None;
            }
            _ => {}
        }
        state.log.push(StatusLogEntry {
            at: Utc::now(),
            payload,
        });
        true
    }

    /// Snapshot of the full transition history.
    pub fn log_snapshot(&self) -> Vec<StatusLogEntry> {
        self.state.lock().expect("lock poisoned").log.clone()
    }

    /// The transition history as one printable block, newest entry last.
    pub fn log_string(&self) -> String {
        let state = self.state.lock().expect("lock poisoned");
        state
            .log
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("Task")
            .field("id", &self.spec.id)
            .field("status", &state.status)
            .field("provider_id", &state.provider_id)
            .field("failed_attempts", &state.failed_attempts)
            .finish()
    }
}
