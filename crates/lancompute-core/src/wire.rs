//! JSON request/response shapes for the HTTP API. Kept separate from
//! [`crate::model`] so the wire format can evolve independently of
//! the domain types it's built from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CapabilityValue, Node, Requirement, Task, TaskStatus};

fn default_priority() -> i64 {
    0
}

#[derive(Debug, Deserialize)]
pub struct TaskSubmission {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub requirements: HashMap<String, Requirement>,
}

#[derive(Debug, Serialize)]
pub struct TaskSubmitResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct NodeRegistrationRequest {
    /// Worker-chosen id. The server mints one (a UUID) when omitted.
    #[serde(default)]
    pub node_id: Option<String>,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityValue>,
}

#[derive(Debug, Serialize)]
pub struct NodeRegisterResponse {
    pub status: &'static str,
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
}

/// The node's current task, piggybacked onto the heartbeat response
/// so a worker never has to poll separately for dispatch.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub task: Option<Task>,
}

#[derive(Debug, Deserialize)]
pub struct TaskUpdateRequest {
    pub task_id: Uuid,
    /// Optional: a status update with no `node_id` applies the
    /// transition without touching any node's active-task bookkeeping.
    #[serde(default)]
    pub node_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskUpdateResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TaskCancelRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TaskCancelResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NodeCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub busy: usize,
}

#[derive(Debug, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: f64,
    pub nodes: NodeCounts,
    pub tasks: TaskCounts,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct NodeListResponse {
    pub nodes: Vec<Node>,
}
