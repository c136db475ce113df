//! Task execution: two independent capacities, a registered handler
//! set, and a completion channel back to the agent loop.
//!
//! `max_concurrent_tasks` gates [`TaskExecutor::can_accept`] — the
//! same notion the coordinator enforces per node
//! (`NODE_CONCURRENCY_LIMIT`). `max_workers` sizes the actual
//! [`tokio::sync::Semaphore`]-bounded pool backing execution; the two
//! capacities are independent of each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lancompute_core::model::{CapabilityValue, Task, TaskStatus};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// Sent back to the agent loop's reporter task once a task finishes.
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub struct TaskExecutor {
    semaphore: Arc<Semaphore>,
    running: Arc<Mutex<HashSet<Uuid>>>,
    max_concurrent_tasks: usize,
    node_id: String,
    capabilities: Arc<HashMap<String, CapabilityValue>>,
    done_tx: mpsc::Sender<TaskOutcome>,
}

impl TaskExecutor {
    pub fn new(
        node_id: String,
        max_concurrent_tasks: usize,
        max_workers: usize,
        capabilities: HashMap<String, CapabilityValue>,
        done_tx: mpsc::Sender<TaskOutcome>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            running: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent_tasks,
            node_id,
            capabilities: Arc::new(capabilities),
            done_tx,
        }
    }

    pub fn can_accept(&self) -> bool {
        self.running.lock().expect("executor mutex poisoned").len() < self.max_concurrent_tasks
    }

    /// Submit a task for background execution. A duplicate id (the
    /// coordinator re-handing out the same task on a race) is logged
    /// and dropped rather than run twice.
    pub fn submit(&self, task: Task) {
        let task_id = task.id;
        {
            let mut running = self.running.lock().expect("executor mutex poisoned");
            if !running.insert(task_id) {
                tracing::warn!(task_id = %task_id, "task already running, ignoring duplicate dispatch");
                return;
            }
        }

        let semaphore = Arc::clone(&self.semaphore);
        let running = Arc::clone(&self.running);
        let capabilities = Arc::clone(&self.capabilities);
        let node_id = self.node_id.clone();
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("executor semaphore should never be closed");

            let outcome = run_task(&task, &node_id, &capabilities).await;

            drop(permit);
            running.lock().expect("executor mutex poisoned").remove(&task_id);

            tracing::info!(task_id = %task_id, status = %outcome.status, "task execution finished");
            let _ = done_tx.send(outcome).await;
        });
    }
}

async fn run_task(
    task: &Task,
    node_id: &str,
    capabilities: &HashMap<String, CapabilityValue>,
) -> TaskOutcome {
    tracing::info!(task_id = %task.id, task_type = %task.task_type, "executing task");

    let handled = match task.task_type.as_str() {
        "compute" => handle_compute(&task.payload),
        "data_processing" => handle_data_processing(&task.payload, capabilities),
        "test" => handle_test(&task.payload, node_id, capabilities).await,
        _ => Err("unknown task type".to_string()),
    };

    match handled {
        Ok(result) => TaskOutcome {
            task_id: task.id,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        },
        Err(error) => TaskOutcome {
            task_id: task.id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error),
        },
    }
}

fn handle_compute(payload: &serde_json::Value) -> Result<serde_json::Value, String> {
    use rand::Rng;

    if payload.get("operation").and_then(|v| v.as_str()) == Some("matrix_multiply") {
        let size = payload.get("size").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
        let mut rng = rand::rng();
        let total: f64 = (0..size * size).map(|_| rng.random::<f64>()).sum();
        return Ok(serde_json::json!({ "result": total, "size": size }));
    }

    Ok(serde_json::json!({ "result": "computed" }))
}

fn handle_data_processing(
    payload: &serde_json::Value,
    capabilities: &HashMap<String, CapabilityValue>,
) -> Result<serde_json::Value, String> {
    let data_size = payload.get("data_size").and_then(|v| v.as_u64()).unwrap_or(1000);

    let unified_memory = matches!(
        capabilities.get("unified_memory"),
        Some(CapabilityValue::Bool(true))
    );

    let message = if unified_memory {
        format!("processed {data_size} items using unified memory")
    } else {
        format!("processed {data_size} items")
    };

    Ok(serde_json::json!({ "result": message }))
}

async fn handle_test(
    payload: &serde_json::Value,
    node_id: &str,
    capabilities: &HashMap<String, CapabilityValue>,
) -> Result<serde_json::Value, String> {
    let duration_secs = payload.get("duration").and_then(|v| v.as_f64()).unwrap_or(1.0);
    let started = Instant::now();
    tokio::time::sleep(Duration::from_secs_f64(duration_secs.max(0.0))).await;

    let platform = match capabilities.get("platform") {
        Some(CapabilityValue::String(p)) => p.clone(),
        _ => "unknown".to_string(),
    };

    Ok(serde_json::json!({
        "result": "test completed",
        "duration": started.elapsed().as_secs_f64(),
        "node_id": node_id,
        "platform": platform,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_type: &str, payload: serde_json::Value) -> Task {
        Task::new(Uuid::new_v4(), task_type.to_string(), payload, 0, HashMap::new())
    }

    #[tokio::test]
    async fn test_task_reports_completion() {
        let (tx, mut rx) = mpsc::channel(4);
        let executor = TaskExecutor::new("n1".into(), 2, 2, HashMap::new(), tx);
        executor.submit(task("test", serde_json::json!({"duration": 0.0})));

        let outcome = rx.recv().await.expect("executor should report an outcome");
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.result.unwrap()["node_id"], "n1");
    }

    #[tokio::test]
    async fn unknown_task_type_fails_with_a_named_error() {
        let (tx, mut rx) = mpsc::channel(4);
        let executor = TaskExecutor::new("n1".into(), 2, 2, HashMap::new(), tx);
        executor.submit(task("summon_demons", serde_json::json!({})));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.error.unwrap(), "unknown task type");
    }

    #[tokio::test]
    async fn can_accept_respects_max_concurrent_tasks() {
        let (tx, mut rx) = mpsc::channel(4);
        let executor = TaskExecutor::new("n1".into(), 1, 1, HashMap::new(), tx);
        assert!(executor.can_accept());

        executor.submit(task("test", serde_json::json!({"duration": 0.2})));
        assert!(!executor.can_accept());

        let _ = rx.recv().await;
    }
}
