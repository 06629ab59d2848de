//! Task-to-provider matchmaking.
//!
//! The [`Dispatcher`] owns the provider registry, caches the market minimum
//! cost, and drives the placement loop that moves a task from submission to
//! a node. Providers report back over an internal signal channel; a single
//! spawned loop consumes it so reactions to provider churn are serialized.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use easel_core::meta::{PrivateMetaInfo, PublicMetaInfo};
use easel_core::pricing::{accepts_cost, provider_score};
use easel_core::status::{TaskStatus, TaskStatusPayload};
use easel_core::types::ProviderId;

use crate::config::DispatchConfig;
use crate::connection::NetworkConnection;
use crate::estimator::{FixedTimeModel, TaskTimeModel};
use crate::events::{EngineEvent, EngineEvents, ProviderSignal, TaskOutcome};
use crate::provider::{Provider, ScheduleOutcome};
use crate::task::Task;

/// Reason stamped on tasks whose scheduling budget ran out.
pub(crate) const SCHEDULE_FAILED_REASON: &str = "Failed to schedule task";

/// Errors surfaced by [`Dispatcher::add_task`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("task {task_id} is already resolved as {status}")]
    AlreadyResolved {
        task_id: easel_core::types::TaskId,
        status: TaskStatus,
    },
    #[error("no provider available for task {task_id} after {attempts} attempts")]
    NoProviderAvailable {
        task_id: easel_core::types::TaskId,
        attempts: u32,
    },
    #[error("task {task_id} could not be delivered to provider {provider_id}")]
    SendFailed {
        task_id: easel_core::types::TaskId,
        provider_id: ProviderId,
    },
}

/// Result of a registration: a brand new provider, or a known one whose
/// transport was replaced.
pub enum RegisteredProvider {
    Added(Arc<Provider>),
    Restored(Arc<Provider>),
}

impl RegisteredProvider {
    pub fn provider(&self) -> &Arc<Provider> {
        match self {
            RegisteredProvider::Added(provider) | RegisteredProvider::Restored(provider) => {
                provider
            }
        }
    }

    pub fn is_restored(&self) -> bool {
        matches!(self, RegisteredProvider::Restored(_))
    }
}

struct DispatcherInner {
    providers: HashMap<ProviderId, Arc<Provider>>,
    /// Cheapest advertised cost among online, non-busy providers. `None`
    /// when no provider can take work at all.
    min_cost: Option<u32>,
}

/// The matchmaking core.
///
/// Lock discipline: the registry lock may take a provider's state lock, a
/// provider never takes the registry lock, and no lock is ever held across
/// an await.
pub struct Dispatcher {
    config: DispatchConfig,
    inner: Mutex<DispatcherInner>,
    events: EngineEvents,
    signals: mpsc::UnboundedSender<ProviderSignal>,
    stop: CancellationToken,
    model: Arc<dyn TaskTimeModel>,
}

impl Dispatcher {
    /// Spin up a dispatcher with the default task-time model.
    pub fn start(config: DispatchConfig) -> Arc<Self> {
        Self::with_time_model(config, Arc::new(FixedTimeModel::default()))
    }

    /// Spin up a dispatcher with a custom task-time model.
    pub fn with_time_model(config: DispatchConfig, model: Arc<dyn TaskTimeModel>) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Self {
            config,
            inner: Mutex::new(DispatcherInner {
                providers: HashMap::new(),
                min_cost: None,
            }),
            events: EngineEvents::default(),
            signals: signal_tx,
            stop: CancellationToken::new(),
            model,
        });

        tokio::spawn(Arc::clone(&dispatcher).signal_loop(signal_rx));
        dispatcher
    }

    // -----------------------------------------------------------------------
    // Provider registry
    // -----------------------------------------------------------------------

    /// Add a provider, or restore a known one.
    ///
    /// Re-registering an id swaps in the new transport and metadata while
    /// keeping the provider's in-flight tasks and track record. A node that
    /// reconnects within its grace period lands here.
    pub fn register_provider(
        &self,
        provider_id: ProviderId,
        public_meta: PublicMetaInfo,
        private_meta: PrivateMetaInfo,
        connection: Arc<dyn NetworkConnection>,
    ) -> RegisteredProvider {
        let registered = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            match inner.providers.entry(provider_id.clone()) {
                Entry::Occupied(entry) => RegisteredProvider::Restored(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    let provider = Provider::new(
                        provider_id.clone(),
                        public_meta.clone(),
                        private_meta,
                        Arc::clone(&connection),
                        Arc::clone(&self.model),
                        self.config.clone(),
                        self.signals.clone(),
                        self.events.clone(),
                    );
                    entry.insert(Arc::clone(&provider));
                    RegisteredProvider::Added(provider)
                }
            }
        };

        match &registered {
            RegisteredProvider::Added(_) => {
                tracing::info!(provider_id = %provider_id, "provider registered");
                self.recalculate_min_cost();
                self.events
                    .publish(EngineEvent::ProviderRegistered { provider_id });
            }
            RegisteredProvider::Restored(provider) => {
                if provider.is_online() {
                    tracing::warn!(provider_id = %provider_id, "provider re-registered while online");
                } else {
                    tracing::info!(provider_id = %provider_id, "provider reconnected within grace period");
                }
                provider.update_public_meta(public_meta);
                provider.restore_connection(connection);
            }
        }

        registered
    }

    /// Evict a provider and reschedule everything it still holds.
    ///
    /// This is the terminal step of both an explicit close and an expired
    /// grace period. Tasks already failed by the grace deadline are left
    /// alone; the rest go back through placement.
    pub fn remove_provider(self: &Arc<Self>, provider_id: &ProviderId) {
        let provider = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.providers.remove(provider_id)
        };
        let Some(provider) = provider else {
            tracing::warn!(provider_id = %provider_id, "remove_provider for unknown provider");
            return;
        };

        // Flip the provider offline before draining, so a placement that
        // already selected it bounces off instead of landing work on a
        // provider nobody tracks anymore.
        provider.retire();
        self.recalculate_min_cost();
        let orphans = provider.drain_in_flight();
        tracing::info!(
            provider_id = %provider_id,
            orphans = orphans.len(),
            "provider removed",
        );
        self.events.publish(EngineEvent::ProviderRemoved {
            provider_id: provider_id.clone(),
        });

        for task in orphans {
            self.spawn_reschedule(task);
        }
    }

    /// React to a broken transport: the provider goes offline and starts
    /// its grace timer, and its in-flight tasks are rescheduled right away
    /// rather than left to ride out the grace period.
    pub fn connection_lost(self: &Arc<Self>, provider_id: &ProviderId) {
        let provider = {
            let inner = self.inner.lock().expect("lock poisoned");
            inner.providers.get(provider_id).cloned()
        };
        let Some(provider) = provider else {
            tracing::warn!(provider_id = %provider_id, "connection_lost for unknown provider");
            return;
        };

        provider.start_offline();
        let orphans = provider.drain_in_flight();
        self.recalculate_min_cost();
        tracing::info!(
            provider_id = %provider_id,
            orphans = orphans.len(),
            "connection lost, rescheduling in-flight tasks",
        );

        for task in orphans {
            self.spawn_reschedule(task);
        }
    }

    pub fn provider(&self, provider_id: &ProviderId) -> Option<Arc<Provider>> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .providers
            .get(provider_id)
            .cloned()
    }

    pub fn provider_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").providers.len()
    }

    /// Cheapest cost any online, non-busy provider would accept. `None`
    /// means the marketplace cannot take work right now.
    pub fn min_cost(&self) -> Option<u32> {
        self.inner.lock().expect("lock poisoned").min_cost
    }

    // -----------------------------------------------------------------------
    // Task placement
    // -----------------------------------------------------------------------

    /// Place a task on the best provider, retrying within the scheduling
    /// budget.
    ///
    /// Each round that ends without the task on the wire (no eligible
    /// provider, or the chosen provider's transport died mid-send) consumes
    /// one attempt; the count survives reschedules. When the budget runs
    /// out the task is failed and its resolution published.
    pub async fn add_task(self: &Arc<Self>, task: &Arc<Task>) -> Result<(), DispatchError> {
        if task.is_terminal() {
            return Err(DispatchError::AlreadyResolved {
                task_id: task.id().clone(),
                status: task.status(),
            });
        }

        loop {
            if task.is_terminal() {
                // Resolved elsewhere (an abort, or a node answering for a
                // previous placement) while we were still looking.
                return Ok(());
            }

            let assigned = self.assign(task);
            if let Some(provider) = &assigned {
                match provider.schedule_task(task).await {
                    ScheduleOutcome::Sent => {
                        self.recalculate_min_cost();
                        return Ok(());
                    }
                    ScheduleOutcome::Resolved => {
                        return Err(DispatchError::SendFailed {
                            task_id: task.id().clone(),
                            provider_id: provider.id().clone(),
                        });
                    }
                    ScheduleOutcome::Superseded => return Ok(()),
                    ScheduleOutcome::Retry => {}
                }
            }

            let attempts = task.add_failed_attempt();
            if attempts >= self.config.max_schedule_attempts {
                tracing::warn!(
                    task_id = %task.id(),
                    attempts,
                    "scheduling budget exhausted",
                );
                self.events.resolve(
                    task,
                    TaskStatusPayload::Failed {
                        reason: SCHEDULE_FAILED_REASON.to_string(),
                    },
                    TaskOutcome::Failed {
                        reason: SCHEDULE_FAILED_REASON.to_string(),
                    },
                );
                return Err(DispatchError::NoProviderAvailable {
                    task_id: task.id().clone(),
                    attempts,
                });
            }

            if assigned.is_none() {
                tracing::debug!(
                    task_id = %task.id(),
                    attempts,
                    "no eligible provider, backing off",
                );
                tokio::time::sleep(self.config.schedule_retry_delay).await;
            }
        }
    }

    /// Abort a task wherever it currently is.
    ///
    /// In-flight tasks are pulled off their provider and the node is told
    /// to stop; unplaced tasks are resolved directly. Returns `false` when
    /// the task was already resolved.
    pub async fn abort_task(&self, task: &Arc<Task>) -> bool {
        if let Some(provider_id) = task.provider_id() {
            if let Some(provider) = self.provider(&provider_id) {
                if provider.abort_task(task).await {
                    return true;
                }
            }
        }

        // Unplaced, or it slipped out of its provider before the abort
        // landed there.
        let aborted = self
            .events
            .resolve(task, TaskStatusPayload::Aborted, TaskOutcome::Aborted);
        if !aborted {
            tracing::warn!(
                task_id = %task.id(),
                status = %task.status(),
                "abort_task on resolved task",
            );
        }
        aborted
    }

    // -----------------------------------------------------------------------
    // Events and shutdown
    // -----------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EngineEvents {
        &self.events
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Stop the signal loop and close every provider transport.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let providers: Vec<Arc<Provider>> = {
            let inner = self.inner.lock().expect("lock poisoned");
            inner.providers.values().cloned().collect()
        };
        for provider in providers {
            provider.close_connection().await;
        }
        tracing::info!("dispatcher stopped");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Pick the cheapest eligible provider and mark the task scheduled on
    /// it. Ties keep the first provider found; comparison is strict.
    fn assign(&self, task: &Arc<Task>) -> Option<Arc<Provider>> {
        let inner = self.inner.lock().expect("lock poisoned");

        let mut best: Option<(f64, u64, Arc<Provider>)> = None;
        for provider in inner.providers.values() {
            let Some(min_cost) = provider.min_cost() else {
                continue;
            };
            if provider.queue_length() > self.config.busy_queue_threshold {
                continue;
            }
            if !accepts_cost(min_cost, task.max_cost()) {
                continue;
            }

            let waiting_time_ms =
                provider.waiting_time_ms() + provider.estimate_task_time(task.spec());
            let score = provider_score(min_cost, waiting_time_ms, task.time_to_money_ratio());
            let better = match &best {
                Some((best_score, _, _)) => score < *best_score,
                None => true,
            };
            if better {
                best = Some((score, waiting_time_ms, Arc::clone(provider)));
            }
        }

        let (score, waiting_time_ms, provider) = best?;
        let scheduled = task.set_status(TaskStatusPayload::Scheduled {
            provider_id: provider.id().clone(),
            score,
            waiting_time_ms,
        });
        // A task resolved mid-selection must not reach the provider.
        scheduled.then_some(provider)
    }

    /// Refresh the cached market minimum from the current registry.
    fn recalculate_min_cost(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let min_cost = inner
            .providers
            .values()
            .filter(|provider| provider.queue_length() <= self.config.busy_queue_threshold)
            .filter_map(|provider| provider.min_cost())
            .min();
        if inner.min_cost != min_cost {
            tracing::debug!(?min_cost, "market minimum cost changed");
            inner.min_cost = min_cost;
        }
    }

    fn spawn_reschedule(self: &Arc<Self>, task: Arc<Task>) {
        if task.is_terminal() {
            return;
        }
        task.set_status(TaskStatusPayload::Unscheduled);

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = dispatcher.add_task(&task).await {
                tracing::warn!(task_id = %task.id(), %error, "reschedule failed");
            }
        });
    }

    async fn signal_loop(
        self: Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<ProviderSignal>,
    ) {
        loop {
            let signal = tokio::select! {
                _ = self.stop.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            match signal {
                ProviderSignal::Updated { .. } => self.recalculate_min_cost(),
                ProviderSignal::Closed { provider_id } => self.remove_provider(&provider_id),
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("lock poisoned");
        f.debug_struct("Dispatcher")
            .field("providers", &inner.providers.len())
            .field("min_cost", &inner.min_cost)
            .finish()
    }
}
