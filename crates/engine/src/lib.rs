//! Cost-aware dispatch engine for image-generation provider nodes.
//!
//! The [`Dispatcher`] owns a registry of [`Provider`]s reached over a
//! [`NetworkConnection`] and places [`Task`]s on the cheapest provider whose
//! price fits the task's spending cap, weighing advertised cost against
//! estimated waiting time. Providers keep per-task in-flight bookkeeping,
//! survive short disconnects behind a grace timer, and hand their tasks back
//! for rescheduling when they go away for good.
//!
//! Task resolution is delivered exactly once per task as a
//! [`EngineEvent::TaskResolved`] broadcast; persistence and long-polling
//! clients are both subscribers of the same bus.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod estimator;
pub mod events;
pub mod provider;
pub mod queue;
pub mod task;

pub use config::DispatchConfig;
pub use connection::{NetworkConnection, NetworkError};
pub use dispatcher::{DispatchError, Dispatcher, RegisteredProvider};
pub use estimator::{FixedTimeModel, ProviderEstimator, TaskTimeModel};
pub use events::{EngineEvent, EngineEvents, TaskOutcome};
pub use provider::Provider;
pub use queue::EntryQueue;
pub use task::Task;
