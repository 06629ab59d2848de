//! Priority admission queue.
//!
//! Standalone staging area for tasks ahead of dispatch: highest priority
//! first, FIFO among equals, with a cost-filtered pop for pulling the next
//! task the market can actually serve. The serving path of this workspace
//! dispatches directly; the queue exists for deployments that need to hold
//! work while capacity is scarce.

use std::sync::{Arc, Mutex};

use easel_core::status::TaskStatusPayload;
use easel_core::types::TaskId;

use crate::task::Task;

type QueueListener = Box<dyn Fn(&Arc<Task>) + Send + Sync>;

/// Priority-ordered holding pen for unscheduled tasks.
pub struct EntryQueue {
    inner: Mutex<QueueInner>,
    listener: Option<QueueListener>,
}

struct QueueInner {
    /// Sorted by descending priority; equal priorities keep arrival order.
    entries: Vec<QueueEntry>,
}

struct QueueEntry {
    task: Arc<Task>,
    priority: i32,
}

impl EntryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: Vec::new(),
            }),
            listener: None,
        }
    }

    /// Build a queue whose listener fires synchronously on every add.
    ///
    /// Injecting the listener at construction leaves no window where an
    /// enqueued task can go unobserved.
    pub fn with_listener(listener: impl Fn(&Arc<Task>) + Send + Sync + 'static) -> Self {
        Self {
            listener: Some(Box::new(listener)),
            ..Self::new()
        }
    }

    /// Park a task with the given priority and notify the listener.
    pub fn add_task(&self, task: &Arc<Task>, priority: i32) {
        task.set_priority(priority);
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            // After the last entry of the same priority keeps FIFO order.
            let at = inner
                .entries
                .partition_point(|entry| entry.priority >= priority);
            inner.entries.insert(
                at,
                QueueEntry {
                    task: Arc::clone(task),
                    priority,
                },
            );
        }
        task.set_status(TaskStatusPayload::Queued { priority });

        match &self.listener {
            Some(listener) => listener(task),
            None => {
                tracing::error!(task_id = %task.id(), "no task-added listener on entry queue");
            }
        }
    }

    /// Pop the highest-priority task regardless of cost.
    pub fn pop_front(&self) -> Option<Arc<Task>> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.entries.is_empty() {
            return None;
        }
        Some(inner.entries.remove(0).task)
    }

    /// Pop the highest-priority task whose spending cap clears `min_cost`.
    ///
    /// The comparison is strict, mirroring the market admission rule: a
    /// task paying exactly the minimum stays parked.
    pub fn pop_task(&self, min_cost: u32) -> Option<Arc<Task>> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let at = inner
            .entries
            .iter()
            .position(|entry| entry.task.max_cost() > min_cost)?;
        Some(inner.entries.remove(at).task)
    }

    /// Drop a parked task by id. Unknown ids are a no-op.
    pub fn remove_task(&self, task_id: &TaskId) -> bool {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.task.id() != task_id);
        inner.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use easel_core::status::TaskStatus;
    use easel_core::task::{TaskOptions, TaskSpec};

    use super::*;

    fn task_with_cost(id: &str, max_cost: u32) -> Arc<Task> {
        Task::new(TaskSpec::with_id(id, max_cost, 1.0, TaskOptions::default()))
    }

    #[test]
    fn pops_highest_priority_first() {
        let queue = EntryQueue::new();
        queue.add_task(&task_with_cost("low", 10), 0);
        queue.add_task(&task_with_cost("high", 10), 5);
        queue.add_task(&task_with_cost("mid", 10), 3);

        assert_eq!(queue.pop_front().unwrap().id(), "high");
        assert_eq!(queue.pop_front().unwrap().id(), "mid");
        assert_eq!(queue.pop_front().unwrap().id(), "low");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn equal_priorities_keep_arrival_order() {
        let queue = EntryQueue::new();
        queue.add_task(&task_with_cost("first", 10), 1);
        queue.add_task(&task_with_cost("second", 10), 1);
        queue.add_task(&task_with_cost("third", 10), 1);

        assert_eq!(queue.pop_front().unwrap().id(), "first");
        assert_eq!(queue.pop_front().unwrap().id(), "second");
        assert_eq!(queue.pop_front().unwrap().id(), "third");
    }

    #[test]
    fn cost_filtered_pop_skips_tasks_at_or_below_the_minimum() {
        let queue = EntryQueue::new();
        queue.add_task(&task_with_cost("rich", 20), 5);
        queue.add_task(&task_with_cost("exact", 10), 9);
        queue.add_task(&task_with_cost("poor", 5), 8);

        // min_cost 10: "exact" (== 10) and "poor" stay parked.
        assert_eq!(queue.pop_task(10).unwrap().id(), "rich");
        assert!(queue.pop_task(10).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn cost_filtered_pop_respects_priority_order() {
        let queue = EntryQueue::new();
        queue.add_task(&task_with_cost("cheap-high", 5), 9);
        queue.add_task(&task_with_cost("rich-low", 20), 1);
        queue.add_task(&task_with_cost("rich-high", 20), 9);

        assert_eq!(queue.pop_task(10).unwrap().id(), "rich-high");
        assert_eq!(queue.pop_task(10).unwrap().id(), "rich-low");
    }

    #[test]
    fn add_marks_task_queued_and_stamps_priority() {
        let queue = EntryQueue::new();
        let task = task_with_cost("t", 10);
        queue.add_task(&task, 7);

        assert_eq!(task.status(), TaskStatus::Queued);
        assert_eq!(task.priority(), 7);
    }

    #[test]
    fn listener_fires_synchronously_on_add() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let queue = EntryQueue::with_listener(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        queue.add_task(&task_with_cost("t1", 10), 0);
        queue.add_task(&task_with_cost("t2", 10), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_task_deletes_by_id() {
        let queue = EntryQueue::new();
        queue.add_task(&task_with_cost("keep", 10), 0);
        queue.add_task(&task_with_cost("drop", 10), 0);

        assert!(queue.remove_task(&"drop".to_string()));
        assert!(!queue.remove_task(&"drop".to_string()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().unwrap().id(), "keep");
    }
}
