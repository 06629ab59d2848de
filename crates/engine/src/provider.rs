//! Provider lifecycle: in-flight bookkeeping, task forwarding, and
//! disconnect handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use easel_core::meta::{PrivateMetaInfo, PublicMetaInfo};
use easel_core::status::TaskStatusPayload;
use easel_core::task::{TaskResult, TaskSpec};
use easel_core::types::{ProviderId, TaskId};

use crate::config::DispatchConfig;
use crate::connection::{NetworkConnection, NetworkError};
use crate::estimator::{ProviderEstimator, TaskTimeModel};
use crate::events::{EngineEvents, ProviderSignal, TaskOutcome};
use crate::task::Task;

/// Reason stamped on tasks a provider takes down with it.
pub(crate) const OFFLINE_REASON: &str = "Provider is offline";

/// Reason stamped on tasks whose send budget ran out.
pub(crate) const SEND_FAILED_REASON: &str = "Failed to send task";

/// What became of one placement attempt.
pub(crate) enum ScheduleOutcome {
    /// The task is on the wire and tracked in-flight.
    Sent,
    /// The provider cannot take the task (offline, or the transport died
    /// mid-send); the task was released and the caller should pick another
    /// provider.
    Retry,
    /// The task reached a terminal state while being placed.
    Resolved,
    /// A drain or a concurrent resolution took the task over while the
    /// placement ran; the caller must leave it alone.
    Superseded,
}

/// One registered provider node.
///
/// Holds the node's advertised capabilities, the outbound transport, and
/// the set of tasks currently on the node. The in-flight map is the source
/// of truth for `queue_length`, and membership in it is the idempotence
/// guard for completion, failure, and abort signals: whoever removes the
/// task first wins, later signals are no-ops.
pub struct Provider {
    id: ProviderId,
    config: DispatchConfig,
    state: Mutex<ProviderState>,
    signals: mpsc::UnboundedSender<ProviderSignal>,
    events: EngineEvents,
}

struct ProviderState {
    public_meta: PublicMetaInfo,
    private_meta: PrivateMetaInfo,
    connection: Arc<dyn NetworkConnection>,
    online: bool,
    in_flight: HashMap<TaskId, Arc<Task>>,
    estimator: ProviderEstimator,
    offline_guard: Option<CancellationToken>,
}

impl ProviderState {
    /// Remove a task from the in-flight map and the estimator.
    ///
    /// Returns `false` when the task was not tracked here.
    fn release(&mut self, task_id: &TaskId) -> bool {
        if self.in_flight.remove(task_id).is_none() {
            return false;
        }
        self.estimator.remove_task(task_id);
        true
    }
}

impl Provider {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ProviderId,
        public_meta: PublicMetaInfo,
        private_meta: PrivateMetaInfo,
        connection: Arc<dyn NetworkConnection>,
        model: Arc<dyn TaskTimeModel>,
        config: DispatchConfig,
        signals: mpsc::UnboundedSender<ProviderSignal>,
        events: EngineEvents,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            state: Mutex::new(ProviderState {
                public_meta,
                private_meta,
                connection,
                online: true,
                in_flight: HashMap::new(),
                estimator: ProviderEstimator::new(model),
                offline_guard: None,
            }),
            signals,
            events,
        })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Number of tasks currently on the node, pending sends included.
    pub fn queue_length(&self) -> usize {
        self.state.lock().expect("lock poisoned").in_flight.len()
    }

    /// Estimated time until the node would start a newly placed task.
    pub fn waiting_time_ms(&self) -> u64 {
        self.state
            .lock()
            .expect("lock poisoned")
            .estimator
            .waiting_time_ms()
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().expect("lock poisoned").online
    }

    /// Advertised minimum cost, or `None` while the provider is offline.
    ///
    /// Offline providers price themselves out of selection entirely.
    pub fn min_cost(&self) -> Option<u32> {
        let state = self.state.lock().expect("lock poisoned");
        state.online.then_some(state.public_meta.min_cost)
    }

    pub fn public_meta(&self) -> PublicMetaInfo {
        self.state.lock().expect("lock poisoned").public_meta.clone()
    }

    pub fn private_meta(&self) -> PrivateMetaInfo {
        self.state.lock().expect("lock poisoned").private_meta
    }

    /// Estimate one task against the node's current capabilities.
    pub fn estimate_task_time(&self, task: &TaskSpec) -> u64 {
        let state = self.state.lock().expect("lock poisoned");
        state.estimator.estimate_task_time(task, &state.public_meta)
    }

    /// Look up a task by id in the in-flight map.
    pub fn in_flight_task(&self, task_id: &TaskId) -> Option<Arc<Task>> {
        self.state
            .lock()
            .expect("lock poisoned")
            .in_flight
            .get(task_id)
            .cloned()
    }

    pub(crate) fn update_public_meta(&self, meta: PublicMetaInfo) {
        self.state.lock().expect("lock poisoned").public_meta = meta;
        self.notify_updated();
    }

    /// Replace the operator-private metadata wholesale.
    ///
    /// The task counters normally accumulate in place; this hook exists for
    /// operator tooling that seeds or corrects them.
    pub fn update_private_meta(&self, meta: PrivateMetaInfo) {
        self.state.lock().expect("lock poisoned").private_meta = meta;
        self.notify_updated();
    }

    /// Track a task and forward it to the node.
    ///
    /// The task joins the in-flight map before the first send so
    /// `queue_length` never undercounts. Transient send failures retry up
    /// to the configured budget; a closed transport releases the task for
    /// re-selection and escalates provider closure.
    pub(crate) async fn schedule_task(self: &Arc<Self>, task: &Arc<Task>) -> ScheduleOutcome {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.online {
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    "refusing to schedule on an offline provider",
                );
                return ScheduleOutcome::Retry;
            }
            // An abort can land between selection and this insert; a task
            // already resolved must never enter the in-flight map.
            if task.is_terminal() {
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    status = %task.status(),
                    "task resolved before it could be placed",
                );
                return ScheduleOutcome::Superseded;
            }
            state.in_flight.insert(task.id().clone(), Arc::clone(task));
            let meta = state.public_meta.clone();
            state.estimator.add_task(task.spec(), &meta);
        }

        for attempt in 1..=self.config.send_attempts {
            let connection = self.connection();
            match connection.send_task(task.spec()).await {
                Ok(()) => {
                    if task.set_status(TaskStatusPayload::Sent) {
                        return ScheduleOutcome::Sent;
                    }
                    // Resolved while the frame was on the wire: take the
                    // task back and tell the node to drop the work.
                    tracing::warn!(
                        provider_id = %self.id,
                        task_id = %task.id(),
                        status = %task.status(),
                        "task resolved during send",
                    );
                    self.state.lock().expect("lock poisoned").release(task.id());
                    let _ = connection.abort_task(task.id()).await;
                    return ScheduleOutcome::Superseded;
                }
                Err(NetworkError::Closed) => {
                    tracing::warn!(
                        provider_id = %self.id,
                        task_id = %task.id(),
                        attempt,
                        "connection closed while sending task",
                    );
                    task.set_status(TaskStatusPayload::SendFailed { attempt });
                    // Going offline here keeps the provider out of the very
                    // next selection round; eviction follows the signal.
                    let owned = {
                        let mut state = self.state.lock().expect("lock poisoned");
                        state.online = false;
                        state.release(task.id())
                    };
                    let _ = self.signals.send(ProviderSignal::Closed {
                        provider_id: self.id.clone(),
                    });
                    return if owned {
                        ScheduleOutcome::Retry
                    } else {
                        ScheduleOutcome::Superseded
                    };
                }
                Err(NetworkError::Send(reason)) => {
                    tracing::warn!(
                        provider_id = %self.id,
                        task_id = %task.id(),
                        attempt,
                        %reason,
                        "failed to send task",
                    );
                    task.set_status(TaskStatusPayload::SendFailed { attempt });
                }
            }
        }

        if self.task_failed(task, SEND_FAILED_REASON) {
            ScheduleOutcome::Resolved
        } else {
            ScheduleOutcome::Superseded
        }
    }

    /// Abort an in-flight task: untrack it, resolve it as aborted, and tell
    /// the node to stop. Aborting a task not held here is a logged no-op.
    pub async fn abort_task(&self, task: &Arc<Task>) -> bool {
        let released = self
            .state
            .lock()
            .expect("lock poisoned")
            .release(task.id());
        if !released {
            tracing::warn!(
                provider_id = %self.id,
                task_id = %task.id(),
                "abort_task called on task not in flight",
            );
            return false;
        }

        self.events
            .resolve(task, TaskStatusPayload::Aborted, TaskOutcome::Aborted);

        let connection = self.connection();
        match connection.abort_task(task.id()).await {
            Ok(()) => {}
            Err(NetworkError::Closed) => {
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    "connection closed while aborting task",
                );
                self.state.lock().expect("lock poisoned").online = false;
                let _ = self.signals.send(ProviderSignal::Closed {
                    provider_id: self.id.clone(),
                });
            }
            Err(NetworkError::Send(reason)) => {
                // Best effort: the task is already resolved on our side.
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    %reason,
                    "failed to send abort",
                );
            }
        }

        self.notify_updated();
        true
    }

    /// Resolve an in-flight task as completed. First writer wins: a task
    /// no longer tracked here (rescheduled away, aborted, or already
    /// resolved) is a logged no-op.
    pub fn task_completed(&self, task: &Arc<Task>, result: TaskResult) -> bool {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.release(task.id()) {
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    "task_completed for task not in flight",
                );
                return false;
            }
            state.private_meta.succeeded_tasks += 1;
        }

        self.events.resolve(
            task,
            TaskStatusPayload::Completed,
            TaskOutcome::Completed(result),
        );
        self.notify_updated();
        true
    }

    /// Resolve an in-flight task as failed with the node's reason.
    /// Idempotent the same way [`Provider::task_completed`] is.
    pub fn task_failed(&self, task: &Arc<Task>, reason: &str) -> bool {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.release(task.id()) {
                tracing::warn!(
                    provider_id = %self.id,
                    task_id = %task.id(),
                    "task_failed for task not in flight",
                );
                return false;
            }
            state.private_meta.failed_tasks += 1;
        }

        task.add_failed_attempt();
        self.events.resolve(
            task,
            TaskStatusPayload::Failed {
                reason: reason.to_string(),
            },
            TaskOutcome::Failed {
                reason: reason.to_string(),
            },
        );
        self.notify_updated();
        true
    }

    /// Mark the provider offline and start the grace timer.
    ///
    /// If the timer fires before [`Provider::stop_offline`], every task
    /// still held here is failed and the dispatcher is asked to evict the
    /// provider. Calling this twice is a logged no-op.
    pub(crate) fn start_offline(self: &Arc<Self>) {
        let token = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.online {
                tracing::warn!(provider_id = %self.id, "start_offline called twice");
                return;
            }
            state.online = false;
            let token = CancellationToken::new();
            state.offline_guard = Some(token.clone());
            token
        };

        tracing::info!(
            provider_id = %self.id,
            grace_ms = self.config.offline_grace.as_millis() as u64,
            "provider went offline, grace timer started",
        );

        let provider = Arc::clone(self);
        let grace = self.config.offline_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    provider.offline_deadline_hit();
                }
            }
        });
    }

    /// Cancel the grace timer and return online. Calling this while online
    /// is a logged no-op; the cancel itself is idempotent.
    pub(crate) fn stop_offline(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.online {
            tracing::warn!(provider_id = %self.id, "stop_offline called while online");
            return;
        }
        state.online = true;
        if let Some(guard) = state.offline_guard.take() {
            guard.cancel();
        }
    }

    /// Take the provider out of service for good: offline, grace timer
    /// cancelled. A placement racing the eviction sees the offline flag
    /// and re-selects instead of parking work here.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.online = false;
        if let Some(guard) = state.offline_guard.take() {
            guard.cancel();
        }
    }

    /// Whether this provider currently sends over the given transport.
    ///
    /// Lets a transport session that is shutting down detect it was
    /// superseded by a reconnect, so it does not report a disconnect on
    /// behalf of the live session.
    pub fn uses_connection(&self, connection: &Arc<dyn NetworkConnection>) -> bool {
        Arc::ptr_eq(
            &self.state.lock().expect("lock poisoned").connection,
            connection,
        )
    }

    /// Swap in a fresh transport and return online, keeping the in-flight
    /// bookkeeping intact.
    pub(crate) fn restore_connection(&self, connection: Arc<dyn NetworkConnection>) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.connection = connection;
        }
        self.stop_offline();
        self.notify_updated();
    }

    /// Empty the in-flight map and estimator, handing the tasks back.
    pub(crate) fn drain_in_flight(&self) -> Vec<Arc<Task>> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.estimator.clear();
        state.in_flight.drain().map(|(_, task)| task).collect()
    }

    pub(crate) async fn close_connection(&self) {
        let connection = self.connection();
        connection.close().await;
    }

    fn offline_deadline_hit(&self) {
        tracing::info!(provider_id = %self.id, "offline grace period expired");
        for task in self.drain_in_flight() {
            self.events.resolve(
                &task,
                TaskStatusPayload::Failed {
                    reason: OFFLINE_REASON.to_string(),
                },
                TaskOutcome::Failed {
                    reason: OFFLINE_REASON.to_string(),
                },
            );
        }
        let _ = self.signals.send(ProviderSignal::Closed {
            provider_id: self.id.clone(),
        });
    }

    fn connection(&self) -> Arc<dyn NetworkConnection> {
        Arc::clone(&self.state.lock().expect("lock poisoned").connection)
    }

    fn notify_updated(&self) {
        let _ = self.signals.send(ProviderSignal::Updated {
            provider_id: self.id.clone(),
        });
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("online", &state.online)
            .field("queue_length", &state.in_flight.len())
            .finish()
    }
}
