//! Domain types shared by the task queue and node registry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-node concurrency cap.
pub const DEFAULT_NODE_CONCURRENCY_LIMIT: usize = 2;

/// Default liveness window before a silent node is marked offline, in seconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sinks: no further transition is ever valid.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Liveness status of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
            Self::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// A constraint a task places on one capability key.
///
/// `#[serde(untagged)]` so requests can write plain JSON values
/// (`"gpu_available": true`, `"cpu_count": 4`, `"region": ["us", "eu"]`)
/// without a discriminator tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    NumericMinimum(f64),
    ExactBool(bool),
    ExactString(String),
    StringSet(Vec<String>),
}

/// A capability a node advertises for one key. Mirrors [`Requirement`]
/// minus the set variant — nodes only ever report scalar values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Number(f64),
    Bool(bool),
    String(String),
}

/// A unit of work routed to a worker by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub requirements: HashMap<String, Requirement>,
    pub status: TaskStatus,
    pub assigned_node: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Tie-breaker for the `(-priority, created_at)` ordering key.
    /// Not part of the wire format — wall-clock time alone is not
    /// assumed strictly monotonic.
    #[serde(skip)]
    pub seq: u64,
}

impl Task {
    /// Build a freshly-submitted task in `PENDING` status. `seq` is
    /// assigned by [`crate::queue::TaskQueue::add`].
    pub fn new(
        id: Uuid,
        task_type: String,
        payload: serde_json::Value,
        priority: i64,
        requirements: HashMap<String, Requirement>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            priority,
            requirements,
            status: TaskStatus::Pending,
            assigned_node: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            seq: 0,
        }
    }
}

/// A registered compute node.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub capabilities: HashMap<String, CapabilityValue>,
    pub status: NodeStatus,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_heartbeat: DateTime<Utc>,
    pub current_tasks: HashSet<Uuid>,
    pub total_completed: u64,
    pub total_failed: u64,
}
