use std::sync::Arc;

use easel_engine::Dispatcher;
use easel_storage::{TaskStore, UserRegistry};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The dispatch engine placing tasks on provider nodes.
    pub dispatcher: Arc<Dispatcher>,
    /// Task records and persisted results.
    pub store: Arc<TaskStore>,
    /// Token to user-id minting.
    pub users: Arc<UserRegistry>,
    /// Server configuration (timeouts, CORS, auth).
    pub config: Arc<ServerConfig>,
}
