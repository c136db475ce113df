//! The worker's main loop: register (retrying with exponential
//! backoff capped at 30s on failure), then heartbeat on an interval,
//! executing whatever task the heartbeat response carries and
//! reporting outcomes back through a dedicated reporter task.
//!
//! Heartbeat failures back off to a fixed 30 second interval after
//! more than 3 in a row, then resume the configured interval once a
//! heartbeat succeeds again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lancompute_core::model::{CapabilityValue, TaskStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{CoordinatorClient, HeartbeatError};
use crate::executor::{TaskExecutor, TaskOutcome};
use crate::{capabilities, cli};

const FAILURE_BACKOFF: Duration = Duration::from_secs(30);
const FAILURE_THRESHOLD: u32 = 3;
const REGISTER_BACKOFF_CAP: Duration = Duration::from_secs(30);
const REGISTER_BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct AgentConfig {
    pub node_id: String,
    pub master_url: String,
    pub address: String,
    pub port: u16,
    pub max_concurrent_tasks: usize,
    pub max_workers: usize,
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    pub fn from_cli(cli: &cli::Cli, node_id: String, address: String) -> Self {
        Self {
            node_id,
            master_url: cli.master_url.trim_end_matches('/').to_string(),
            address,
            port: cli.port,
            max_concurrent_tasks: cli.max_tasks,
            max_workers: cli.max_workers.unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
            }),
            heartbeat_interval: Duration::from_secs_f64(cli.heartbeat_interval),
        }
    }
}

pub async fn run(config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    let client = Arc::new(CoordinatorClient::new(config.master_url.clone())?);
    let capabilities: HashMap<String, CapabilityValue> = capabilities::detect();

    tracing::info!(node_id = %config.node_id, master_url = %config.master_url, "starting worker");
    if !register_with_backoff(&client, &config, &capabilities, &cancel).await {
        tracing::info!("shutdown requested before registration succeeded");
        return Ok(());
    }
    tracing::info!("registered with coordinator");

    let (done_tx, done_rx) = mpsc::channel::<TaskOutcome>(32);
    let executor = Arc::new(TaskExecutor::new(
        config.node_id.clone(),
        config.max_concurrent_tasks,
        config.max_workers,
        capabilities.clone(),
        done_tx,
    ));

    let reporter = tokio::spawn(run_reporter(Arc::clone(&client), config.node_id.clone(), done_rx));

    heartbeat_loop(&client, &executor, &config, &capabilities, &cancel).await;

    drop(executor);
    let _ = reporter.await;
    tracing::info!("worker shut down");
    Ok(())
}

/// Retry initial registration with exponential backoff capped at 30s.
/// Returns `false` if cancellation fires before a registration succeeds.
async fn register_with_backoff(
    client: &CoordinatorClient,
    config: &AgentConfig,
    capabilities: &HashMap<String, CapabilityValue>,
    cancel: &CancellationToken,
) -> bool {
    let mut backoff = REGISTER_BACKOFF_BASE;
    loop {
        match client
            .register(&config.node_id, &config.address, config.port, capabilities.clone())
            .await
        {
            Ok(()) => return true,
            Err(err) => {
                tracing::warn!(error = %err, backoff_secs = backoff.as_secs_f64(), "registration failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(REGISTER_BACKOFF_CAP);
            }
        }
    }
}

async fn heartbeat_loop(
    client: &CoordinatorClient,
    executor: &TaskExecutor,
    config: &AgentConfig,
    capabilities: &HashMap<String, CapabilityValue>,
    cancel: &CancellationToken,
) {
    let mut consecutive_failures: u32 = 0;

    while !cancel.is_cancelled() {
        match client.heartbeat(&config.node_id).await {
            Ok(response) => {
                consecutive_failures = 0;
                if let Some(task) = response.task {
                    accept_or_release(client, executor, config, task).await;
                }
            }
            Err(HeartbeatError::UnknownNode(node_id)) => {
                tracing::warn!(node_id = %node_id, "coordinator does not know this node, re-registering");
                if let Err(err) = client
                    .register(&config.node_id, &config.address, config.port, capabilities.clone())
                    .await
                {
                    tracing::error!(error = %err, "re-registration failed");
                    consecutive_failures += 1;
                } else {
                    consecutive_failures = 0;
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                tracing::warn!(error = %err, consecutive_failures, "heartbeat failed");
            }
        }

        let sleep_for = if consecutive_failures > FAILURE_THRESHOLD {
            tracing::error!("multiple heartbeat failures in a row, backing off");
            FAILURE_BACKOFF
        } else {
            config.heartbeat_interval
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

async fn accept_or_release(
    client: &CoordinatorClient,
    executor: &TaskExecutor,
    config: &AgentConfig,
    task: lancompute_core::model::Task,
) {
    if executor.can_accept() {
        tracing::info!(task_id = %task.id, "accepting dispatched task");
        if let Err(err) = client
            .update_task(task.id, &config.node_id, TaskStatus::Running, None, None)
            .await
        {
            tracing::error!(task_id = %task.id, error = %err, "failed to report task running");
        }
        executor.submit(task);
        return;
    }

    // The coordinator and this worker each believed there was capacity
    // at the moment of dispatch. Hand the task back to pending rather
    // than silently dropping it.
    tracing::warn!(task_id = %task.id, "at capacity, releasing task back to pending");
    if let Err(err) = client
        .update_task(task.id, &config.node_id, TaskStatus::Pending, None, None)
        .await
    {
        tracing::error!(task_id = %task.id, error = %err, "failed to release task back to pending");
    }
}

async fn run_reporter(
    client: Arc<CoordinatorClient>,
    node_id: String,
    mut done_rx: mpsc::Receiver<TaskOutcome>,
) {
    while let Some(outcome) = done_rx.recv().await {
        if let Err(err) = client
            .update_task(outcome.task_id, &node_id, outcome.status, outcome.result, outcome.error)
            .await
        {
            tracing::error!(task_id = %outcome.task_id, error = %err, "failed to report task outcome");
        }
    }
}
