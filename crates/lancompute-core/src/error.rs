//! Error taxonomy for the coordination core.
//!
//! [`CoreError::DuplicateTaskId`] and [`CoreError::IllegalTransition`]
//! are client errors (400), [`CoreError::UnknownTask`] /
//! [`CoreError::UnknownNode`] are not-found (404).
//! [`CoreError::CapacityExceeded`] never reaches an HTTP caller
//! directly — the scheduler and dispatch path check capacity before
//! attaching, so it only ever fires on a logic bug.

use uuid::Uuid;

use crate::model::TaskStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("task {0} already exists")]
    DuplicateTaskId(Uuid),

    #[error("task {0} not found")]
    UnknownTask(Uuid),

    #[error("node {0} not found")]
    UnknownNode(String),

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("node {0} is already at its concurrency limit")]
    CapacityExceeded(String),
}
