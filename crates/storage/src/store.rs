//! Task records indexed by id and by owner.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use easel_core::status::TaskStatus;
use easel_core::task::{PublicTaskStatus, TaskResult};
use easel_core::types::{TaskId, UserId};
use easel_core::CoreError;
use easel_engine::Task;

/// Client-facing snapshot of one stored task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskData {
    pub task_id: TaskId,
    pub status: PublicTaskStatus,
    /// Rendered status history, one transition per line.
    pub detailed_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

struct TaskRecord {
    task: Arc<Task>,
    owner: UserId,
    result: Option<TaskResult>,
}

impl TaskRecord {
    fn data(&self) -> TaskData {
        let status = self.task.status();
        // The recorder writes results asynchronously; success is announced
        // only once the result is readable here.
        let status = if status == TaskStatus::Completed && self.result.is_none() {
            PublicTaskStatus::Pending
        } else {
            status.public()
        };
        TaskData {
            task_id: self.task.id().clone(),
            status,
            detailed_status: self.task.log_string(),
            result: self.result.clone(),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<TaskId, TaskRecord>,
    by_user: HashMap<UserId, Vec<TaskId>>,
}

/// All tasks ever submitted, live and resolved alike.
///
/// The store holds the same `Arc<Task>` the engine works on, so status reads
/// are always current; only results are written here separately, by the
/// [`ResultRecorder`](crate::ResultRecorder).
#[derive(Default)]
pub struct TaskStore {
    inner: RwLock<StoreInner>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task under its owner. A duplicate id is a logged no-op.
    pub fn add_task(&self, owner: UserId, task: Arc<Task>) {
        let mut guard = self.inner.write().expect("lock poisoned");
        let StoreInner { records, by_user } = &mut *guard;
        match records.entry(task.id().clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(task_id = %task.id(), "task id already stored");
            }
            Entry::Vacant(entry) => {
                by_user.entry(owner).or_default().push(task.id().clone());
                entry.insert(TaskRecord {
                    task,
                    owner,
                    result: None,
                });
            }
        }
    }

    /// The live task handle, if the id is known.
    pub fn task(&self, task_id: &TaskId) -> Option<Arc<Task>> {
        self.inner
            .read()
            .expect("lock poisoned")
            .records
            .get(task_id)
            .map(|record| Arc::clone(&record.task))
    }

    pub fn get_task_data(&self, task_id: &TaskId) -> Result<TaskData, CoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .records
            .get(task_id)
            .map(TaskRecord::data)
            .ok_or_else(|| CoreError::NotFound {
                entity: "task",
                id: task_id.clone(),
            })
    }

    /// Like [`TaskStore::get_task_data`], but only for the task's owner.
    pub fn get_task_data_with_verification(
        &self,
        task_id: &TaskId,
        user: UserId,
    ) -> Result<TaskData, CoreError> {
        let inner = self.inner.read().expect("lock poisoned");
        let record = inner.records.get(task_id).ok_or_else(|| CoreError::NotFound {
            entity: "task",
            id: task_id.clone(),
        })?;
        if record.owner != user {
            return Err(CoreError::Forbidden(
                "operation is not permitted".to_string(),
            ));
        }
        Ok(record.data())
    }

    /// Every task the user has submitted, in submission order.
    pub fn get_tasks(&self, user: UserId) -> Vec<TaskData> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .by_user
            .get(&user)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id))
                    .map(TaskRecord::data)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attach a node-reported result. An unknown id is a logged no-op.
    pub fn add_result(&self, task_id: &TaskId, result: TaskResult) {
        let mut inner = self.inner.write().expect("lock poisoned");
        match inner.records.get_mut(task_id) {
            Some(record) => record.result = Some(result),
            None => {
                tracing::warn!(task_id = %task_id, "result for unknown task dropped");
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use easel_core::status::TaskStatusPayload;
    use easel_core::task::TaskSpec;

    fn stored_task(store: &TaskStore, owner: UserId) -> Arc<Task> {
        let task = Task::new(TaskSpec::default());
        store.add_task(owner, Arc::clone(&task));
        task
    }

    #[test]
    fn stores_and_reads_back_a_task() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        let data = store.get_task_data(task.id()).unwrap();
        assert_eq!(&data.task_id, task.id());
        assert_eq!(data.status, PublicTaskStatus::Pending);
        assert!(data.result.is_none());
        assert_eq!(store.task_count(), 1);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let store = TaskStore::new();
        let error = store.get_task_data(&"missing".to_string()).unwrap_err();
        assert!(matches!(error, CoreError::NotFound { .. }));
    }

    #[test]
    fn ownership_is_enforced() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        assert!(store.get_task_data_with_verification(task.id(), 1).is_ok());
        let error = store
            .get_task_data_with_verification(task.id(), 2)
            .unwrap_err();
        match error {
            CoreError::Forbidden(message) => {
                assert_eq!(message, "operation is not permitted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_do_not_overwrite() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        let clone = Task::new(TaskSpec::with_id(
            task.id().clone(),
            5,
            1.0,
            Default::default(),
        ));
        store.add_task(2, clone);

        assert_eq!(store.task_count(), 1);
        assert!(store.get_task_data_with_verification(task.id(), 1).is_ok());
        assert_eq!(store.get_tasks(2).len(), 0);
    }

    #[test]
    fn result_and_status_show_up_in_task_data() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        task.set_status(TaskStatusPayload::Completed);
        store.add_result(
            task.id(),
            TaskResult {
                images: vec!["http://img/a.png".into()],
            },
        );

        let data = store.get_task_data(task.id()).unwrap();
        assert_eq!(data.status, PublicTaskStatus::Success);
        assert_eq!(
            data.result.unwrap().images,
            vec!["http://img/a.png".to_string()]
        );
        assert!(data.detailed_status.contains("COMPLETED"));
    }

    #[test]
    fn completed_task_stays_pending_until_its_result_lands() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        // The node has answered but the recorder has not written yet; a
        // poller must not see SUCCESS with no images.
        task.set_status(TaskStatusPayload::Completed);
        let data = store.get_task_data(task.id()).unwrap();
        assert_eq!(data.status, PublicTaskStatus::Pending);
        assert!(data.result.is_none());

        store.add_result(
            task.id(),
            TaskResult {
                images: vec!["http://img/a.png".into()],
            },
        );
        let data = store.get_task_data(task.id()).unwrap();
        assert_eq!(data.status, PublicTaskStatus::Success);
        assert!(data.result.is_some());
    }

    #[test]
    fn failed_task_reports_failure_without_a_result() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        task.set_status(TaskStatusPayload::Failed {
            reason: "boom".into(),
        });
        let data = store.get_task_data(task.id()).unwrap();
        assert_eq!(data.status, PublicTaskStatus::Failure);
        assert!(data.result.is_none());
    }

    #[test]
    fn tasks_list_follows_submission_order() {
        let store = TaskStore::new();
        let first = stored_task(&store, 7);
        let second = stored_task(&store, 7);
        stored_task(&store, 8);

        let tasks = store.get_tasks(7);
        assert_eq!(tasks.len(), 2);
        assert_eq!(&tasks[0].task_id, first.id());
        assert_eq!(&tasks[1].task_id, second.id());
    }

    #[test]
    fn result_for_unknown_task_is_dropped() {
        let store = TaskStore::new();
        store.add_result(&"ghost".to_string(), TaskResult::default());
        assert_eq!(store.task_count(), 0);
    }

    #[test]
    fn task_data_serializes_without_null_result() {
        let store = TaskStore::new();
        let task = stored_task(&store, 1);

        let value = serde_json::to_value(store.get_task_data(task.id()).unwrap()).unwrap();
        assert_eq!(value["status"], "PENDING");
        assert!(value.get("result").is_none());
    }
}
