//! The background dispatch loop.
//!
//! Heartbeats already piggyback a dispatch attempt for their own
//! node, so this loop mostly exists to sweep up capacity that opened
//! on a node that hasn't heartbeat since (a release, a cancellation,
//! or another node's completion waking a shared-capability task free
//! for anyone). It wakes on [`Coordinator::notified`] or a 5 second
//! tick, whichever comes first, and exits as soon as the cancellation
//! token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;

const TICK_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run(coordinator: Arc<Coordinator>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!("scheduler loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("scheduler loop shutting down");
                break;
            }
            _ = tick.tick() => {}
            _ = coordinator.notified() => {}
        }

        dispatch_pass(&coordinator);
    }
}

/// One dispatch attempt against every currently-available node: keep
/// pulling for a node while it has spare capacity, stopping as soon
/// as `dispatch_to_node` returns `None`, per §4.3 ("while
/// |current_tasks| < NODE_CONCURRENCY_LIMIT ... stop when pull_for
/// returns none"). `dispatch_to_node` only ever returns `Err` for an
/// unknown node id, which cannot happen here since the ids come
/// straight from the registry's own listing.
fn dispatch_pass(coordinator: &Coordinator) {
    for node in coordinator.registry.list_available() {
        loop {
            match coordinator.dispatch_to_node(&node.id) {
                Ok(Some(task)) => {
                    tracing::debug!(task_id = %task.id, node_id = %node.id, "scheduler dispatched task");
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(node_id = %node.id, error = %err, "unexpected error during scheduled dispatch");
                    break;
                }
            }
        }
    }
}
