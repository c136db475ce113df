//! The task queue: priority ordering, capability matching, at-most-once
//! assignment, and status lifecycle.
//!
//! All state lives behind a single [`std::sync::Mutex`]: `pull_for`
//! holds it for the entire find-and-claim so two concurrent pulls can
//! never claim the same task. The internal index is an ordered map
//! keyed by `(-priority, seq)` rather than a pop-and-reinsert binary
//! heap, so a scan that skips non-matching tasks never mutates the
//! index — no reinsertion step needed.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::matching;
use crate::model::{Node, Task, TaskStatus};

type ReadyKey = (Reverse<i64>, u64);

/// State guarded by [`TaskQueue`]'s single mutex. `pub(crate)` so
/// [`crate::coordinator::Coordinator`] can nest a queue lock inside an
/// already-held registry lock for atomic dispatch.
pub(crate) struct QueueState {
    pub(crate) tasks: HashMap<Uuid, Task>,
    pub(crate) ready: BTreeMap<ReadyKey, Uuid>,
    next_seq: u64,
}

pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: HashMap::new(),
                ready: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("task queue mutex poisoned")
    }

    /// Insert a task with status `PENDING`. Rejects a duplicate id.
    pub fn add(&self, mut task: Task) -> Result<Task, CoreError> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(CoreError::DuplicateTaskId(task.id));
        }
        task.status = TaskStatus::Pending;
        task.seq = state.next_seq;
        state.next_seq += 1;
        state.ready.insert((Reverse(task.priority), task.seq), task.id);
        let inserted = task.clone();
        state.tasks.insert(task.id, task);
        tracing::info!(task_id = %inserted.id, priority = inserted.priority, "task added to queue");
        Ok(inserted)
    }

    /// Atomically find and claim the best-eligible `PENDING` task for
    /// `node`, transitioning it to `ASSIGNED`. Never errors — returns
    /// `None` when nothing matches.
    pub fn pull_for(&self, node: &Node) -> Option<Task> {
        let mut state = self.lock();
        Self::pull_for_state(&mut state, node)
    }

    /// Lock-free core of [`Self::pull_for`], usable by
    /// [`crate::coordinator::Coordinator`] while it already holds this
    /// queue's lock.
    pub(crate) fn pull_for_state(state: &mut QueueState, node: &Node) -> Option<Task> {
        let winning_key = state.ready.iter().find_map(|(key, task_id)| {
            let task = state.tasks.get(task_id)?;
            matching::node_satisfies(&node.capabilities, &task.requirements).then_some(*key)
        })?;

        let task_id = state.ready.remove(&winning_key)?;
        let task = state.tasks.get_mut(&task_id)?;
        task.status = TaskStatus::Assigned;
        task.assigned_node = Some(node.id.clone());
        tracing::info!(task_id = %task_id, node_id = %node.id, "task claimed");
        Some(task.clone())
    }

    /// Apply `update_status`'s transition table, enforcing the
    /// allowed transition graph and setting `started_at` /
    /// `completed_at` on entry to the relevant states.
    ///
    /// `ASSIGNED -> PENDING` is the release transition: it clears
    /// `assigned_node` without touching timestamps or result/error,
    /// used when a worker hands back a task it could not start.
    pub fn update_status(
        &self,
        task_id: Uuid,
        new_status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Task, CoreError> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(CoreError::UnknownTask(task_id))?;

        if !is_valid_transition(task.status, new_status) {
            return Err(CoreError::IllegalTransition {
                task_id,
                from: task.status,
                to: new_status,
            });
        }

        apply_transition(task, new_status, result, error);
        tracing::info!(task_id = %task_id, status = %new_status, "task status updated");
        Ok(task.clone())
    }

    /// Cancel a task from any non-terminal state.
    pub fn cancel(&self, task_id: Uuid) -> Result<Task, CoreError> {
        let mut state = self.lock();
        let status = state
            .tasks
            .get(&task_id)
            .map(|t| t.status)
            .ok_or(CoreError::UnknownTask(task_id))?;

        if status.is_terminal() {
            return Err(CoreError::IllegalTransition {
                task_id,
                from: status,
                to: TaskStatus::Cancelled,
            });
        }

        if status == TaskStatus::Pending {
            let task = &state.tasks[&task_id];
            let key = (Reverse(task.priority), task.seq);
            state.ready.remove(&key);
        }

        let task = state.tasks.get_mut(&task_id).expect("checked above");
        task.status = TaskStatus::Cancelled;
        task.assigned_node = None;
        task.completed_at = Some(Utc::now());
        tracing::info!(task_id = %task_id, "task cancelled");
        Ok(task.clone())
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.lock().tasks.get(&task_id).cloned()
    }

    pub fn list(&self) -> Vec<Task> {
        let state = self.lock();
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }
}

fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Assigned)
            | (Assigned, Running)
            | (Assigned, Pending)
            | (Running, Completed)
            | (Running, Failed)
            | (Pending, Cancelled)
            | (Assigned, Cancelled)
            | (Running, Cancelled)
    )
}

fn apply_transition(
    task: &mut Task,
    to: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
) {
    match to {
        TaskStatus::Running => task.started_at = Some(Utc::now()),
        TaskStatus::Completed | TaskStatus::Failed => {
            task.completed_at = Some(Utc::now());
            task.result = result;
            task.error = error;
        }
        TaskStatus::Cancelled => {
            task.completed_at = Some(Utc::now());
            task.assigned_node = None;
        }
        TaskStatus::Pending => {
            // Release: the worker could not start a claimed task.
            task.assigned_node = None;
        }
        TaskStatus::Assigned => {}
    }
    task.status = to;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: "127.0.0.1".into(),
            port: 0,
            capabilities: Map::new(),
            status: crate::model::NodeStatus::Online,
            last_heartbeat: Utc::now(),
            current_tasks: Default::default(),
            total_completed: 0,
            total_failed: 0,
        }
    }

    fn task(priority: i64) -> Task {
        Task::new(Uuid::new_v4(), "test".into(), serde_json::json!({}), priority, Map::new())
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let queue = TaskQueue::new();
        let t = task(0);
        let id = t.id;
        queue.add(t.clone()).unwrap();
        let mut dup = t;
        dup.id = id;
        assert!(matches!(queue.add(dup), Err(CoreError::DuplicateTaskId(i)) if i == id));
    }

    #[test]
    fn pull_for_respects_priority_order() {
        let queue = TaskQueue::new();
        let low = queue.add(task(0)).unwrap();
        let high = queue.add(task(10)).unwrap();
        let n = node("n1");

        let pulled = queue.pull_for(&n).expect("a task should match");
        assert_eq!(pulled.id, high.id);

        let pulled2 = queue.pull_for(&n).expect("a task should match");
        assert_eq!(pulled2.id, low.id);
    }

    #[test]
    fn pull_for_skips_non_matching_without_losing_position() {
        let queue = TaskQueue::new();
        let mut reqs = Map::new();
        reqs.insert(
            "gpu_available".to_string(),
            crate::model::Requirement::ExactBool(true),
        );
        let gpu_task = Task::new(Uuid::new_v4(), "test".into(), serde_json::json!({}), 5, reqs);
        let gpu_task_id = gpu_task.id;
        queue.add(gpu_task).unwrap();
        let plain = queue.add(task(0)).unwrap();

        let n = node("n1");
        let pulled = queue.pull_for(&n).expect("the plain task should still match");
        assert_eq!(pulled.id, plain.id);
        assert!(queue.get(gpu_task_id).unwrap().status == TaskStatus::Pending);
    }

    #[test]
    fn update_status_rejects_illegal_transition() {
        let queue = TaskQueue::new();
        let t = queue.add(task(0)).unwrap();
        let err = queue
            .update_status(t.id, TaskStatus::Completed, None, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition { .. }));
    }

    #[test]
    fn terminal_status_is_a_sink() {
        let queue = TaskQueue::new();
        let n = node("n1");
        let t = queue.add(task(0)).unwrap();
        queue.pull_for(&n).unwrap();
        queue
            .update_status(t.id, TaskStatus::Running, None, None)
            .unwrap();
        queue
            .update_status(t.id, TaskStatus::Completed, Some(serde_json::json!("ok")), None)
            .unwrap();

        let err = queue
            .update_status(t.id, TaskStatus::Failed, None, Some("late".into()))
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition { .. }));
    }

    #[test]
    fn concurrent_pulls_never_double_claim() {
        let queue = Arc::new(TaskQueue::new());
        for _ in 0..50 {
            queue.add(task(0)).unwrap();
        }

        let nodes: Vec<Node> = (0..8).map(|i| node(&format!("n{i}"))).collect();
        let claimed: Arc<std::sync::Mutex<Vec<Uuid>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for n in &nodes {
                let queue = Arc::clone(&queue);
                let claimed = Arc::clone(&claimed);
                scope.spawn(move || {
                    while let Some(t) = queue.pull_for(n) {
                        claimed.lock().unwrap().push(t.id);
                    }
                });
            }
        });

        let claimed = claimed.lock().unwrap();
        let unique: std::collections::HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), unique.len(), "each task claimed at most once");
        assert_eq!(claimed.len(), 50);
    }
}
