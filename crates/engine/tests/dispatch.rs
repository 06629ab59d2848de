//! End-to-end dispatch behavior against scripted provider transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use easel_core::meta::{PrivateMetaInfo, PublicMetaInfo};
use easel_core::status::TaskStatus;
use easel_core::task::{TaskOptions, TaskResult, TaskSpec};
use easel_core::types::TaskId;
use easel_engine::{
    DispatchConfig, DispatchError, Dispatcher, EngineEvent, NetworkConnection, NetworkError, Task,
    TaskOutcome,
};

/// Transport double that records traffic and can be broken on demand.
#[derive(Default)]
struct MockConnection {
    sent: Mutex<Vec<TaskId>>,
    aborts: Mutex<Vec<TaskId>>,
    broken: AtomicBool,
    flaky: AtomicBool,
}

impl MockConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All further sends fail with [`NetworkError::Closed`].
    fn break_transport(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// All further sends fail with a transient [`NetworkError::Send`].
    fn make_flaky(&self) {
        self.flaky.store(true, Ordering::SeqCst);
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn abort_count(&self) -> usize {
        self.aborts.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkConnection for MockConnection {
    async fn send_task(&self, task: &TaskSpec) -> Result<(), NetworkError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }
        if self.flaky.load(Ordering::SeqCst) {
            return Err(NetworkError::Send("injected failure".into()));
        }
        self.sent.lock().unwrap().push(task.id.clone());
        Ok(())
    }

    async fn abort_task(&self, task_id: &TaskId) -> Result<(), NetworkError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }
        self.aborts.lock().unwrap().push(task_id.clone());
        Ok(())
    }

    async fn close(&self) {
        self.break_transport();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn quick_config() -> DispatchConfig {
    DispatchConfig {
        offline_grace: Duration::from_millis(100),
        schedule_retry_delay: Duration::from_millis(10),
        ..DispatchConfig::default()
    }
}

fn meta(min_cost: u32) -> PublicMetaInfo {
    PublicMetaInfo {
        models: vec!["sd15".into()],
        gpu_type: "gpu1".into(),
        ncpu: 8,
        ram: 32,
        min_cost,
    }
}

fn node(dispatcher: &Arc<Dispatcher>, id: &str, min_cost: u32) -> Arc<MockConnection> {
    let connection = MockConnection::new();
    dispatcher.register_provider(
        id.into(),
        meta(min_cost),
        PrivateMetaInfo::default(),
        Arc::clone(&connection) as Arc<dyn NetworkConnection>,
    );
    connection
}

fn task(max_cost: u32) -> Arc<Task> {
    Task::new(TaskSpec::new(max_cost, 1.0, TaskOptions::default()))
}

fn queue_of(dispatcher: &Arc<Dispatcher>, id: &str) -> usize {
    dispatcher
        .provider(&id.to_string())
        .map(|provider| provider.queue_length())
        .unwrap_or(0)
}

async fn next_resolution(
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
) -> (TaskId, TaskOutcome) {
    loop {
        match timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for an engine event")
            .expect("event bus closed")
        {
            EngineEvent::TaskResolved { task_id, outcome } => return (task_id, outcome),
            _ => continue,
        }
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Cheapest provider takes the task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cheapest_provider_takes_the_task() {
    let dispatcher = Dispatcher::start(quick_config());
    let cheap = node(&dispatcher, "cheap", 5);
    let mid = node(&dispatcher, "mid", 10);
    let pricey = node(&dispatcher, "pricey", 15);

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    assert_eq!(t.status(), TaskStatus::Sent);
    assert_eq!(t.provider_id().as_deref(), Some("cheap"));
    assert_eq!(queue_of(&dispatcher, "cheap"), 1);
    assert_eq!(queue_of(&dispatcher, "mid"), 0);
    assert_eq!(queue_of(&dispatcher, "pricey"), 0);
    assert_eq!(cheap.sent_count(), 1);
    assert_eq!(mid.sent_count() + pricey.sent_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: Load spreads once the cheap provider queues up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_spreads_once_the_cheap_provider_queues_up() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    node(&dispatcher, "p2", 6);

    // Default estimate is 4ms per task and the ratio is 1.0, so p1 wins at
    // scores 9 and 13, p2 at 10 and 14: an even split after four tasks.
    for _ in 0..4 {
        dispatcher.add_task(&task(20)).await.unwrap();
    }

    assert_eq!(queue_of(&dispatcher, "p1"), 2);
    assert_eq!(queue_of(&dispatcher, "p2"), 2);
}

// ---------------------------------------------------------------------------
// Test: Providers over the task's max cost are skipped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expensive_providers_are_skipped_entirely() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        max_schedule_attempts: 2,
        schedule_retry_delay: Duration::from_millis(5),
        ..quick_config()
    });
    let pricey = node(&dispatcher, "pricey", 30);

    let t = task(10);
    let result = dispatcher.add_task(&t).await;

    assert!(matches!(
        result,
        Err(DispatchError::NoProviderAvailable { attempts: 2, .. })
    ));
    assert_eq!(t.status(), TaskStatus::Failed);
    assert_eq!(pricey.sent_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: Empty marketplace fails the task after its budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_marketplace_fails_the_task_after_its_budget() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        max_schedule_attempts: 5,
        schedule_retry_delay: Duration::from_millis(5),
        ..quick_config()
    });
    let mut events = dispatcher.subscribe();

    let t = task(20);
    let result = dispatcher.add_task(&t).await;

    assert!(matches!(
        result,
        Err(DispatchError::NoProviderAvailable { attempts: 5, .. })
    ));
    assert_eq!(t.status(), TaskStatus::Failed);
    assert_eq!(t.failed_attempts(), 5);

    let (task_id, outcome) = next_resolution(&mut events).await;
    assert_eq!(&task_id, t.id());
    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "Failed to schedule task".into()
        }
    );
}

// ---------------------------------------------------------------------------
// Results reported by nodes
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Node result resolves the task exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn node_result_resolves_the_task_exactly_once() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    let mut events = dispatcher.subscribe();

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    let provider = dispatcher.provider(&"p1".to_string()).unwrap();
    let result = TaskResult {
        images: vec!["http://img/a.png".into()],
    };
    assert!(provider.task_completed(&t, result.clone()));
    assert!(!provider.task_completed(&t, result));

    assert_eq!(t.status(), TaskStatus::Completed);
    assert_eq!(queue_of(&dispatcher, "p1"), 0);
    assert_eq!(provider.private_meta().succeeded_tasks, 1);

    let (task_id, outcome) = next_resolution(&mut events).await;
    assert_eq!(&task_id, t.id());
    match outcome {
        TaskOutcome::Completed(result) => {
            assert_eq!(result.images, vec!["http://img/a.png".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: Node error fails the task with its reason
// ---------------------------------------------------------------------------

#[tokio::test]
async fn node_error_fails_the_task_with_its_reason() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    let mut events = dispatcher.subscribe();

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    let provider = dispatcher.provider(&"p1".to_string()).unwrap();
    assert!(provider.task_failed(&t, "CUDA out of memory"));

    assert_eq!(t.status(), TaskStatus::Failed);
    assert_eq!(queue_of(&dispatcher, "p1"), 0);
    assert_eq!(provider.private_meta().failed_tasks, 1);

    let (_, outcome) = next_resolution(&mut events).await;
    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "CUDA out of memory".into()
        }
    );
}

// ---------------------------------------------------------------------------
// Aborts
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Abort pulls an in-flight task off its node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abort_pulls_an_in_flight_task_off_its_node() {
    let dispatcher = Dispatcher::start(quick_config());
    let connection = node(&dispatcher, "p1", 5);
    let mut events = dispatcher.subscribe();

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    assert!(dispatcher.abort_task(&t).await);
    assert_eq!(t.status(), TaskStatus::Aborted);
    assert_eq!(queue_of(&dispatcher, "p1"), 0);
    assert_eq!(connection.abort_count(), 1);

    let (_, outcome) = next_resolution(&mut events).await;
    assert_eq!(outcome, TaskOutcome::Aborted);

    // Aborting again is a no-op.
    assert!(!dispatcher.abort_task(&t).await);
}

// ---------------------------------------------------------------------------
// Test: Abort stops a task still waiting for a provider
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abort_stops_a_task_still_looking_for_a_provider() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        max_schedule_attempts: 100,
        schedule_retry_delay: Duration::from_millis(10),
        ..quick_config()
    });

    let t = task(20);
    let placement = {
        let dispatcher = Arc::clone(&dispatcher);
        let t = Arc::clone(&t);
        tokio::spawn(async move { dispatcher.add_task(&t).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(dispatcher.abort_task(&t).await);

    // The placement loop notices the resolution and bows out cleanly.
    let result = timeout(Duration::from_secs(2), placement)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(t.status(), TaskStatus::Aborted);
}

// ---------------------------------------------------------------------------
// Connection loss and recovery
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Lost connection reassigns in-flight tasks immediately
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lost_connection_reassigns_in_flight_tasks_immediately() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    let backup = node(&dispatcher, "p2", 10);

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();
    assert_eq!(t.provider_id().as_deref(), Some("p1"));

    dispatcher.connection_lost(&"p1".to_string());

    // Reassignment does not wait for the grace period.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(t.status(), TaskStatus::Sent);
    assert_eq!(t.provider_id().as_deref(), Some("p2"));
    assert_eq!(queue_of(&dispatcher, "p1"), 0);
    assert_eq!(queue_of(&dispatcher, "p2"), 1);
    assert_eq!(backup.sent_count(), 1);
    assert_eq!(dispatcher.provider_count(), 2);

    // The grace deadline then evicts the silent provider.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(dispatcher.provider_count(), 1);
    assert!(dispatcher.provider(&"p1".to_string()).is_none());
    assert_eq!(t.status(), TaskStatus::Sent);
}

// ---------------------------------------------------------------------------
// Test: Reconnect within grace keeps the registration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_within_grace_keeps_the_registration() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        offline_grace: Duration::from_millis(150),
        max_schedule_attempts: 50,
        schedule_retry_delay: Duration::from_millis(10),
        ..DispatchConfig::default()
    });
    node(&dispatcher, "p1", 5);

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    dispatcher.connection_lost(&"p1".to_string());
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The node dials back in before its deadline with a fresh transport.
    let fresh = MockConnection::new();
    let registered = dispatcher.register_provider(
        "p1".into(),
        meta(5),
        PrivateMetaInfo::default(),
        Arc::clone(&fresh) as Arc<dyn NetworkConnection>,
    );
    assert!(registered.is_restored());

    // The orphaned task lands on the restored provider, and the provider
    // outlives its original deadline.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(dispatcher.provider_count(), 1);
    assert_eq!(t.status(), TaskStatus::Sent);
    assert_eq!(t.provider_id().as_deref(), Some("p1"));
    assert_eq!(fresh.sent_count(), 1);
}

// ---------------------------------------------------------------------------
// Test: Grace expiry without a backup fails the task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grace_expiry_without_backup_fails_the_rescheduled_task() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        offline_grace: Duration::from_millis(50),
        max_schedule_attempts: 3,
        schedule_retry_delay: Duration::from_millis(20),
        ..DispatchConfig::default()
    });
    node(&dispatcher, "p1", 5);

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    dispatcher.connection_lost(&"p1".to_string());

    // Nobody else can take the task; its scheduling budget drains while the
    // lone provider sits offline, then the deadline evicts the provider.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(t.status(), TaskStatus::Failed);
    assert_eq!(dispatcher.provider_count(), 0);
    assert_eq!(dispatcher.min_cost(), None);
}

// ---------------------------------------------------------------------------
// Test: Explicit close removes the provider right away
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_close_removes_the_provider_right_away() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    let backup = node(&dispatcher, "p2", 10);

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    dispatcher.remove_provider(&"p1".to_string());
    assert_eq!(dispatcher.provider_count(), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(t.status(), TaskStatus::Sent);
    assert_eq!(t.provider_id().as_deref(), Some("p2"));
    assert_eq!(backup.sent_count(), 1);
}

// ---------------------------------------------------------------------------
// Test: Stale completion after reassignment is dropped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_completion_after_reassignment_is_dropped() {
    let dispatcher = Dispatcher::start(quick_config());
    node(&dispatcher, "p1", 5);
    node(&dispatcher, "p2", 10);
    let mut events = dispatcher.subscribe();

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();
    let original = dispatcher.provider(&"p1".to_string()).unwrap();

    dispatcher.connection_lost(&"p1".to_string());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(t.provider_id().as_deref(), Some("p2"));

    // The old provider answers for a task it no longer holds.
    assert!(!original.task_completed(
        &t,
        TaskResult {
            images: vec!["http://img/stale.png".into()],
        }
    ));
    assert_eq!(t.status(), TaskStatus::Sent);

    // The real holder resolves it, exactly once.
    let current = dispatcher.provider(&"p2".to_string()).unwrap();
    assert!(current.task_completed(
        &t,
        TaskResult {
            images: vec!["http://img/fresh.png".into()],
        }
    ));

    let (task_id, outcome) = next_resolution(&mut events).await;
    assert_eq!(&task_id, t.id());
    match outcome {
        TaskOutcome::Completed(result) => {
            assert_eq!(result.images, vec!["http://img/fresh.png".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Transport failures during placement
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Dead transport during send moves the task over
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_transport_during_send_moves_the_task_over() {
    let dispatcher = Dispatcher::start(quick_config());
    let doomed = node(&dispatcher, "p1", 5);
    let backup = node(&dispatcher, "p2", 10);

    doomed.break_transport();

    let t = task(20);
    dispatcher.add_task(&t).await.unwrap();

    assert_eq!(t.status(), TaskStatus::Sent);
    assert_eq!(t.provider_id().as_deref(), Some("p2"));
    assert_eq!(backup.sent_count(), 1);
    assert_eq!(t.failed_attempts(), 1);

    // The escalated closure evicts the broken provider.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(dispatcher.provider_count(), 1);
}

// ---------------------------------------------------------------------------
// Test: Transient send errors exhaust the send budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_send_errors_exhaust_the_send_budget() {
    let dispatcher = Dispatcher::start(DispatchConfig {
        send_attempts: 3,
        ..quick_config()
    });
    let flaky = node(&dispatcher, "p1", 5);
    flaky.make_flaky();

    let t = task(20);
    let result = dispatcher.add_task(&t).await;

    assert!(matches!(result, Err(DispatchError::SendFailed { .. })));
    assert_eq!(t.status(), TaskStatus::Failed);
    assert_eq!(queue_of(&dispatcher, "p1"), 0);

    let send_failures = t
        .log_snapshot()
        .iter()
        .filter(|entry| entry.payload.status() == TaskStatus::SendFailed)
        .count();
    assert_eq!(send_failures, 3);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

// ---------------------------------------------------------------------------
// Test: Shutdown closes every transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_every_transport() {
    let dispatcher = Dispatcher::start(quick_config());
    let c1 = node(&dispatcher, "p1", 5);
    let c2 = node(&dispatcher, "p2", 10);

    dispatcher.shutdown().await;

    assert!(c1.broken.load(Ordering::SeqCst));
    assert!(c2.broken.load(Ordering::SeqCst));
}
