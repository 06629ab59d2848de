use std::fmt;

use crate::task::PublicTaskStatus;
use crate::types::{ProviderId, Timestamp};

/// Lifecycle states of a dispatched task.
///
/// `Unscheduled → Scheduled → Sent → {Completed, Failed, Aborted}` is the
/// happy path. `Queued` marks a task parked in the admission queue,
/// `SendFailed` a transient transport failure before a retry. Any
/// non-terminal state may cycle back to `Unscheduled` when the task is
/// handed back for rescheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Unscheduled,
    Queued,
    Scheduled,
    SendFailed,
    Sent,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }

    /// Client-facing projection of the detailed state.
    pub fn public(self) -> PublicTaskStatus {
        match self {
            TaskStatus::Completed => PublicTaskStatus::Success,
            TaskStatus::Failed | TaskStatus::Aborted => PublicTaskStatus::Failure,
            TaskStatus::Unscheduled
            | TaskStatus::Queued
            | TaskStatus::Scheduled
            | TaskStatus::SendFailed
            | TaskStatus::Sent => PublicTaskStatus::Pending,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Unscheduled => "UNSCHEDULED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::SendFailed => "SEND_FAILED",
            TaskStatus::Sent => "SENT",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// One status transition with the fields specific to it.
///
/// The coarse [`TaskStatus`] is derived from the payload; the payload is
/// what lands in the task's append-only history.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatusPayload {
    Unscheduled,
    Queued {
        priority: i32,
    },
    Scheduled {
        provider_id: ProviderId,
        score: f64,
        waiting_time_ms: u64,
    },
    SendFailed {
        attempt: u32,
    },
    Sent,
    Completed,
    Failed {
        reason: String,
    },
    Aborted,
}

impl TaskStatusPayload {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskStatusPayload::Unscheduled => TaskStatus::Unscheduled,
            TaskStatusPayload::Queued { .. } => TaskStatus::Queued,
            TaskStatusPayload::Scheduled { .. } => TaskStatus::Scheduled,
            TaskStatusPayload::SendFailed { .. } => TaskStatus::SendFailed,
            TaskStatusPayload::Sent => TaskStatus::Sent,
            TaskStatusPayload::Completed => TaskStatus::Completed,
            TaskStatusPayload::Failed { .. } => TaskStatus::Failed,
            TaskStatusPayload::Aborted => TaskStatus::Aborted,
        }
    }
}

/// The single place payloads are rendered as text. The match is exhaustive
/// so a new variant cannot ship without a rendering.
impl fmt::Display for TaskStatusPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatusPayload::Unscheduled => f.write_str("UNSCHEDULED"),
            TaskStatusPayload::Queued { priority } => {
                write!(f, "QUEUED: priority={priority}")
            }
            TaskStatusPayload::Scheduled {
                provider_id,
                score,
                waiting_time_ms,
            } => {
                write!(
                    f,
                    "SCHEDULED: provider_id={provider_id}, score={score:.3}, waiting_time={waiting_time_ms}ms"
                )
            }
            TaskStatusPayload::SendFailed { attempt } => {
                write!(f, "SEND_FAILED: attempt={attempt}")
            }
            TaskStatusPayload::Sent => f.write_str("SENT"),
            TaskStatusPayload::Completed => f.write_str("COMPLETED"),
            TaskStatusPayload::Failed { reason } => {
                write!(f, "FAILED: reason={reason}")
            }
            TaskStatusPayload::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// One record of a task's append-only history.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLogEntry {
    pub at: Timestamp,
    pub payload: TaskStatusPayload,
}

impl fmt::Display for StatusLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format("%H:%M:%S %d/%m/%Y"), self.payload)
    }
}
