use chrono::{DateTime, Utc};

/// Task identifier: a UUIDv4 string minted at submission.
pub type TaskId = String;

/// Provider identifier: a stable id announced by the node at registration.
pub type ProviderId = String;

/// User identifier minted per auth token.
pub type UserId = u64;

/// Timestamp type used across the workspace.
pub type Timestamp = DateTime<Utc>;

/// Mint a fresh task id.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}
