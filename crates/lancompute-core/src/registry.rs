//! The node registry: registration, heartbeat-driven liveness, and
//! per-node task attachment accounting.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{CapabilityValue, Node, NodeStatus, DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_NODE_CONCURRENCY_LIMIT};

/// State guarded by [`NodeRegistry`]'s single mutex. `pub(crate)` so
/// [`crate::coordinator::Coordinator`] can nest a registry lock around
/// a queue-lock acquisition for atomic dispatch.
pub(crate) struct RegistryState {
    pub(crate) nodes: HashMap<String, Node>,
}

pub struct NodeRegistry {
    state: Mutex<RegistryState>,
    heartbeat_timeout_secs: u64,
    concurrency_limit: usize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_NODE_CONCURRENCY_LIMIT)
    }

    pub fn with_limits(heartbeat_timeout_secs: u64, concurrency_limit: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState { nodes: HashMap::new() }),
            heartbeat_timeout_secs,
            concurrency_limit,
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().expect("node registry mutex poisoned")
    }

    /// Register a node, or re-register one that reconnects under the
    /// same id. A re-registration refreshes `capabilities` and
    /// liveness but leaves `current_tasks` and the lifetime counters
    /// untouched — the worker is the same process reconnecting, not a
    /// new one, so in-flight task attachments must survive it.
    pub fn register(
        &self,
        id: String,
        address: String,
        port: u16,
        capabilities: HashMap<String, CapabilityValue>,
    ) -> Node {
        let mut state = self.lock();

        if let Some(existing) = state.nodes.get_mut(&id) {
            existing.address = address;
            existing.port = port;
            existing.capabilities = capabilities;
            existing.status = NodeStatus::Online;
            existing.last_heartbeat = Utc::now();
            tracing::info!(node_id = %id, "node re-registered");
            return existing.clone();
        }

        let node = Node {
            id: id.clone(),
            address,
            port,
            capabilities,
            status: NodeStatus::Online,
            last_heartbeat: Utc::now(),
            current_tasks: HashSet::new(),
            total_completed: 0,
            total_failed: 0,
        };
        state.nodes.insert(id.clone(), node.clone());
        tracing::info!(node_id = %id, "node registered");
        node
    }

    /// Record a heartbeat, flipping the node back to `ONLINE` if a
    /// prior sweep had marked it `OFFLINE`.
    pub fn heartbeat(&self, id: &str) -> Result<Node, CoreError> {
        let mut state = self.lock();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownNode(id.to_string()))?;
        node.last_heartbeat = Utc::now();
        if node.status == NodeStatus::Offline {
            node.status = NodeStatus::Online;
        }
        Ok(node.clone())
    }

    /// Sweep nodes whose last heartbeat has aged past the timeout,
    /// marking them `OFFLINE`. Invoked lazily on read rather than on
    /// a separate timer task.
    pub fn sweep_stale(&self) -> Vec<String> {
        let mut state = self.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(self.heartbeat_timeout_secs as i64);
        let mut went_offline = Vec::new();
        for node in state.nodes.values_mut() {
            if node.status != NodeStatus::Offline && node.last_heartbeat < cutoff {
                node.status = NodeStatus::Offline;
                went_offline.push(node.id.clone());
            }
        }
        if !went_offline.is_empty() {
            tracing::warn!(nodes = ?went_offline, "nodes marked offline after missed heartbeats");
        }
        went_offline
    }

    /// Nodes eligible to receive new work: `ONLINE` (after a stale
    /// sweep) and under their concurrency limit.
    pub fn list_available(&self) -> Vec<Node> {
        self.sweep_stale();
        let state = self.lock();
        state
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Online && n.current_tasks.len() < self.concurrency_limit)
            .cloned()
            .collect()
    }

    /// Record that `task_id` is now running on `node_id`, flipping the
    /// node to `BUSY` once it is at capacity.
    pub(crate) fn attach_locked(state: &mut RegistryState, node_id: &str, task_id: Uuid, limit: usize) {
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.current_tasks.insert(task_id);
            if node.current_tasks.len() >= limit {
                node.status = NodeStatus::Busy;
            }
        }
    }

    /// Release a task from a node's active set on completion,
    /// failure, cancellation, or release-back-to-pending, flipping a
    /// `BUSY` node back to `ONLINE` once capacity frees up, and
    /// bumping the relevant lifetime counter.
    pub fn detach(&self, node_id: &str, task_id: Uuid, outcome: DetachOutcome) {
        let mut state = self.lock();
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.current_tasks.remove(&task_id);
            match outcome {
                DetachOutcome::Completed => node.total_completed += 1,
                DetachOutcome::Failed => node.total_failed += 1,
                DetachOutcome::Released | DetachOutcome::Cancelled => {}
            }
            if node.status == NodeStatus::Busy && node.current_tasks.len() < self.concurrency_limit {
                node.status = NodeStatus::Online;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.lock().nodes.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Node> {
        let state = self.lock();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn last_heartbeat(&self, id: &str) -> Option<DateTime<Utc>> {
        self.lock().nodes.get(id).map(|n| n.last_heartbeat)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a task left a node's active set, driving which lifetime
/// counter (if any) gets bumped in [`NodeRegistry::detach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    Completed,
    Failed,
    Released,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn caps() -> HashMap<String, CapabilityValue> {
        HashMap::new()
    }

    #[test]
    fn register_then_get() {
        let registry = NodeRegistry::new();
        registry.register("n1".into(), "10.0.0.1".into(), 9000, caps());
        let node = registry.get("n1").expect("should be registered");
        assert_eq!(node.status, NodeStatus::Online);
        assert!(node.current_tasks.is_empty());
    }

    #[test]
    fn reregister_preserves_current_tasks_and_counters() {
        let registry = NodeRegistry::with_limits(DEFAULT_HEARTBEAT_TIMEOUT_SECS, 2);
        registry.register("n1".into(), "10.0.0.1".into(), 9000, caps());
        let task_id = Uuid::new_v4();
        {
            let mut state = registry.lock();
            NodeRegistry::attach_locked(&mut state, "n1", task_id, 2);
        }
        registry.detach("n1", Uuid::new_v4(), DetachOutcome::Completed);

        let mut new_caps = HashMap::new();
        new_caps.insert("cpu_count".to_string(), CapabilityValue::Number(8.0));
        registry.register("n1".into(), "10.0.0.2".into(), 9100, new_caps);

        let node = registry.get("n1").expect("should still be registered");
        assert_eq!(node.address, "10.0.0.2");
        assert!(node.current_tasks.contains(&task_id), "reconnecting must not drop in-flight tasks");
        assert_eq!(node.total_completed, 1, "reconnecting must not reset lifetime counters");
        assert_eq!(node.status, NodeStatus::Online);
    }

    #[test]
    fn heartbeat_revives_an_offline_node() {
        let registry = NodeRegistry::with_limits(0, DEFAULT_NODE_CONCURRENCY_LIMIT);
        registry.register("n1".into(), "10.0.0.1".into(), 9000, caps());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let went_offline = registry.sweep_stale();
        assert_eq!(went_offline, vec!["n1".to_string()]);
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Offline);

        registry.heartbeat("n1").unwrap();
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Online);
    }

    #[test]
    fn heartbeat_unknown_node_errors() {
        let registry = NodeRegistry::new();
        assert!(matches!(registry.heartbeat("ghost"), Err(CoreError::UnknownNode(_))));
    }

    #[test]
    fn list_available_excludes_nodes_at_capacity() {
        let registry = NodeRegistry::with_limits(DEFAULT_HEARTBEAT_TIMEOUT_SECS, 1);
        registry.register("n1".into(), "10.0.0.1".into(), 9000, caps());
        assert_eq!(registry.list_available().len(), 1);

        {
            let mut state = registry.lock();
            NodeRegistry::attach_locked(&mut state, "n1", Uuid::new_v4(), 1);
        }
        assert_eq!(registry.get("n1").unwrap().status, NodeStatus::Busy);
        assert!(registry.list_available().is_empty());
    }

    #[test]
    fn detach_frees_capacity_and_counts_outcome() {
        let registry = NodeRegistry::with_limits(DEFAULT_HEARTBEAT_TIMEOUT_SECS, 1);
        registry.register("n1".into(), "10.0.0.1".into(), 9000, caps());
        let task_id = Uuid::new_v4();
        {
            let mut state = registry.lock();
            NodeRegistry::attach_locked(&mut state, "n1", task_id, 1);
        }
        registry.detach("n1", task_id, DetachOutcome::Completed);
        let node = registry.get("n1").unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.total_completed, 1);
        assert!(node.current_tasks.is_empty());
    }

    #[test]
    fn concurrent_registrations_are_all_visible() {
        let registry = Arc::new(NodeRegistry::new());
        std::thread::scope(|scope| {
            for i in 0..16 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    registry.register(format!("n{i}"), "10.0.0.1".into(), 9000, caps());
                });
            }
        });
        assert_eq!(registry.list().len(), 16);
    }
}
