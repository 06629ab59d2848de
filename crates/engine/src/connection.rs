//! Transport seam between the engine and a provider node.
//!
//! The engine only ever talks to a node through [`NetworkConnection`]; the
//! WebSocket implementation lives in the API crate, and tests substitute
//! in-memory fakes.

use async_trait::async_trait;

use easel_core::task::TaskSpec;
use easel_core::types::TaskId;

/// Failure modes of the outbound provider channel.
///
/// `Closed` means the channel is gone for good and the provider should be
/// treated as lost; `Send` is a transient per-message failure worth
/// retrying against the same provider.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound channel to one provider node.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// concurrently; the engine never holds its own locks across these awaits.
#[async_trait]
pub trait NetworkConnection: Send + Sync {
    /// Forward a task to the node.
    async fn send_task(&self, task: &TaskSpec) -> Result<(), NetworkError>;

    /// Ask the node to abandon a task it was sent earlier.
    async fn abort_task(&self, task_id: &TaskId) -> Result<(), NetworkError>;

    /// Close the underlying channel. Idempotent.
    async fn close(&self);
}
