//! The facade that ties the task queue and node registry together.
//!
//! [`Coordinator::dispatch_to_node`] is the only place in the crate
//! that holds both mutexes at once. Lock order is always registry
//! first, then queue — every other operation here takes at most one
//! lock, so that order can never be violated by a second code path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{CapabilityValue, Node, Requirement, Task, TaskStatus, DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_NODE_CONCURRENCY_LIMIT};
use crate::queue::TaskQueue;
use crate::registry::{DetachOutcome, NodeRegistry};

/// Aggregate counts backing the `/status` endpoint.
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub busy_nodes: usize,
    pub pending_tasks: usize,
    pub assigned_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
}

pub struct Coordinator {
    pub queue: TaskQueue,
    pub registry: NodeRegistry,
    /// Woken on submission, registration, heartbeat, and release so
    /// the scheduler loop doesn't have to poll on a tight interval.
    notify: Notify,
    started_at: Instant,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_NODE_CONCURRENCY_LIMIT)
    }

    pub fn with_limits(heartbeat_timeout_secs: u64, concurrency_limit: usize) -> Self {
        Self {
            queue: TaskQueue::new(),
            registry: NodeRegistry::with_limits(heartbeat_timeout_secs, concurrency_limit),
            notify: Notify::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Wait until something may have changed the dispatchable state.
    /// Races against the scheduler's own tick interval and shutdown
    /// signal in the caller's `select!`.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    fn wake_scheduler(&self) {
        self.notify.notify_one();
    }

    pub fn submit_task(
        &self,
        id: Uuid,
        task_type: String,
        payload: serde_json::Value,
        priority: i64,
        requirements: HashMap<String, Requirement>,
    ) -> Result<Task, CoreError> {
        let task = Task::new(id, task_type, payload, priority, requirements);
        let inserted = self.queue.add(task)?;
        self.wake_scheduler();
        Ok(inserted)
    }

    pub fn register_node(
        &self,
        id: String,
        address: String,
        port: u16,
        capabilities: HashMap<String, CapabilityValue>,
    ) -> Node {
        let node = self.registry.register(id, address, port, capabilities);
        self.wake_scheduler();
        node
    }

    /// Find and claim the best-eligible pending task for `node_id`,
    /// attaching it to the node's active set in the same locked
    /// section. Returns `Ok(None)` when the node is absent from
    /// dispatch consideration (offline, at capacity) or nothing
    /// matches — only an unknown node id is an error.
    pub fn dispatch_to_node(&self, node_id: &str) -> Result<Option<Task>, CoreError> {
        let mut registry_state = self.registry.lock();
        let node = registry_state
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownNode(node_id.to_string()))?;

        let limit = self.registry.concurrency_limit();
        if node.status != crate::model::NodeStatus::Online || node.current_tasks.len() >= limit {
            return Ok(None);
        }

        let claimed = {
            let mut queue_state = self.queue.lock();
            TaskQueue::pull_for_state(&mut queue_state, &node)
        };

        if let Some(task) = &claimed {
            NodeRegistry::attach_locked(&mut registry_state, node_id, task.id, limit);
        }

        Ok(claimed)
    }

    /// Record a heartbeat and, in the same call, try to hand the node
    /// a task, piggybacking dispatch on the heartbeat response rather
    /// than waiting for the next scheduler tick.
    pub fn heartbeat_and_dispatch(&self, node_id: &str) -> Result<(Node, Option<Task>), CoreError> {
        let node = self.registry.heartbeat(node_id)?;
        let dispatched = self.dispatch_to_node(node_id)?;
        Ok((node, dispatched))
    }

    /// Apply a worker-reported status update and reconcile the node's
    /// active-task bookkeeping.
    ///
    /// `node_id` is optional (spec §4.4): a status update posted
    /// without one still applies the transition, it just has no node
    /// slot to reconcile. A transition to `PENDING` is the release
    /// path (open question 3): the worker could not start a task it
    /// was handed, so it goes back into circulation and the node's
    /// slot frees up without counting as a failure. Any other status
    /// resolves the task and frees the node's slot with the matching
    /// counter.
    pub fn complete_task_update(
        &self,
        task_id: Uuid,
        node_id: Option<&str>,
        new_status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Task, CoreError> {
        let task = self.queue.update_status(task_id, new_status, result, error)?;

        let outcome = match new_status {
            TaskStatus::Completed => Some(DetachOutcome::Completed),
            TaskStatus::Failed => Some(DetachOutcome::Failed),
            TaskStatus::Pending => Some(DetachOutcome::Released),
            TaskStatus::Cancelled => Some(DetachOutcome::Cancelled),
            TaskStatus::Running | TaskStatus::Assigned => None,
        };

        if let (Some(outcome), Some(node_id)) = (outcome, node_id) {
            self.registry.detach(node_id, task_id, outcome);
            self.wake_scheduler();
        }

        Ok(task)
    }

    /// Cancel a task from any non-terminal state, freeing its node
    /// slot if it had one attached.
    pub fn cancel_task(&self, task_id: Uuid) -> Result<Task, CoreError> {
        let previously_assigned = self.queue.get(task_id).and_then(|t| t.assigned_node);
        let task = self.queue.cancel(task_id)?;
        if let Some(node_id) = previously_assigned {
            self.registry.detach(&node_id, task_id, DetachOutcome::Cancelled);
            self.wake_scheduler();
        }
        Ok(task)
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let nodes = self.registry.list();
        let tasks = self.queue.list();
        use crate::model::NodeStatus::*;
        use TaskStatus::*;

        CoordinatorSnapshot {
            total_nodes: nodes.len(),
            online_nodes: nodes.iter().filter(|n| n.status == Online).count(),
            offline_nodes: nodes.iter().filter(|n| n.status == Offline).count(),
            busy_nodes: nodes.iter().filter(|n| n.status == Busy).count(),
            pending_tasks: tasks.iter().filter(|t| t.status == Pending).count(),
            assigned_tasks: tasks.iter().filter(|t| t.status == Assigned).count(),
            running_tasks: tasks.iter().filter(|t| t.status == Running).count(),
            completed_tasks: tasks.iter().filter(|t| t.status == Completed).count(),
            failed_tasks: tasks.iter().filter(|t| t.status == Failed).count(),
            cancelled_tasks: tasks.iter().filter(|t| t.status == Cancelled).count(),
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle type used by the axum coordinator binary's `State`.
pub type SharedCoordinator = Arc<Coordinator>;

#[cfg(test)]
mod tests {
    use super::*;

    fn node_caps() -> HashMap<String, CapabilityValue> {
        HashMap::new()
    }

    #[test]
    fn submit_then_dispatch_attaches_to_node() {
        let coordinator = Coordinator::with_limits(30, 2);
        coordinator.register_node("n1".into(), "10.0.0.1".into(), 9000, node_caps());
        coordinator
            .submit_task(Uuid::new_v4(), "test".into(), serde_json::json!({}), 0, HashMap::new())
            .unwrap();

        let dispatched = coordinator.dispatch_to_node("n1").unwrap().expect("a task should dispatch");
        assert_eq!(dispatched.status, TaskStatus::Assigned);
        assert!(coordinator.registry.get("n1").unwrap().current_tasks.contains(&dispatched.id));
    }

    #[test]
    fn dispatch_to_unknown_node_errors() {
        let coordinator = Coordinator::new();
        assert!(matches!(coordinator.dispatch_to_node("ghost"), Err(CoreError::UnknownNode(_))));
    }

    #[test]
    fn release_frees_node_slot_without_counting_failure() {
        let coordinator = Coordinator::with_limits(30, 1);
        coordinator.register_node("n1".into(), "10.0.0.1".into(), 9000, node_caps());
        let task = coordinator
            .submit_task(Uuid::new_v4(), "test".into(), serde_json::json!({}), 0, HashMap::new())
            .unwrap();
        coordinator.dispatch_to_node("n1").unwrap();

        coordinator
            .complete_task_update(task.id, Some("n1"), TaskStatus::Pending, None, None)
            .unwrap();

        let node = coordinator.registry.get("n1").unwrap();
        assert!(node.current_tasks.is_empty());
        assert_eq!(node.total_failed, 0);
        assert_eq!(coordinator.queue.get(task.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn cancel_assigned_task_frees_node_slot() {
        let coordinator = Coordinator::with_limits(30, 1);
        coordinator.register_node("n1".into(), "10.0.0.1".into(), 9000, node_caps());
        let task = coordinator
            .submit_task(Uuid::new_v4(), "test".into(), serde_json::json!({}), 0, HashMap::new())
            .unwrap();
        coordinator.dispatch_to_node("n1").unwrap();

        coordinator.cancel_task(task.id).unwrap();
        assert!(coordinator.registry.get("n1").unwrap().current_tasks.is_empty());
        assert_eq!(coordinator.queue.get(task.id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn capability_mismatch_never_dispatches() {
        let coordinator = Coordinator::with_limits(30, 2);
        coordinator.register_node("n1".into(), "10.0.0.1".into(), 9000, node_caps());
        let mut reqs = HashMap::new();
        reqs.insert("gpu_available".to_string(), Requirement::ExactBool(true));
        coordinator
            .submit_task(Uuid::new_v4(), "test".into(), serde_json::json!({}), 0, reqs)
            .unwrap();

        assert!(coordinator.dispatch_to_node("n1").unwrap().is_none());
    }
}
