use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use lancompute_core::model::TaskStatus;
use lancompute_core::wire::{
    HeartbeatRequest, HeartbeatResponse, NodeCounts, NodeListResponse, NodeRegisterResponse,
    NodeRegistrationRequest, StatusResponse, TaskCancelRequest, TaskCancelResponse, TaskCounts,
    TaskListResponse, TaskSubmission, TaskSubmitResponse, TaskUpdateRequest, TaskUpdateResponse,
};
use lancompute_core::SharedCoordinator;

use crate::error::AppError;

pub fn build_router(coordinator: SharedCoordinator) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/task/{id}", get(get_task))
        .route("/task/update", post(update_task))
        .route("/task/cancel", post(cancel_task))
        .route("/tasks", get(list_tasks))
        .route("/node/register", post(register_node))
        .route("/node/heartbeat", post(heartbeat))
        .route("/nodes", get(list_nodes))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

async fn submit_task(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Json(body): Json<TaskSubmission>,
) -> Result<Response, AppError> {
    let task_id = Uuid::new_v4();
    let task = coordinator.submit_task(
        task_id,
        body.task_type,
        body.payload,
        body.priority,
        body.requirements,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(TaskSubmitResponse {
            task_id: task.id,
            status: task.status,
        }),
    )
        .into_response())
}

async fn get_task(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let task = coordinator
        .queue
        .get(id)
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;
    Ok(Json(task).into_response())
}

async fn list_tasks(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
) -> Result<Response, AppError> {
    Ok(Json(TaskListResponse {
        tasks: coordinator.queue.list(),
    })
    .into_response())
}

async fn register_node(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Json(body): Json<NodeRegistrationRequest>,
) -> Result<Response, AppError> {
    let node_id = body.node_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let node = coordinator.register_node(node_id, body.address, body.port, body.capabilities);
    Ok(Json(NodeRegisterResponse {
        status: "registered",
        node_id: node.id,
    })
    .into_response())
}

async fn heartbeat(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Response, AppError> {
    let (_node, dispatched) = coordinator.heartbeat_and_dispatch(&body.node_id)?;
    Ok(Json(HeartbeatResponse {
        status: "ok",
        task: dispatched,
    })
    .into_response())
}

async fn list_nodes(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
) -> Result<Response, AppError> {
    Ok(Json(NodeListResponse {
        nodes: coordinator.registry.list(),
    })
    .into_response())
}

async fn update_task(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Json(body): Json<TaskUpdateRequest>,
) -> Result<Response, AppError> {
    if body.status == TaskStatus::Failed && body.error.is_none() {
        return Err(AppError::bad_request(
            "status \"failed\" requires an error message",
        ));
    }

    coordinator.complete_task_update(
        body.task_id,
        body.node_id.as_deref(),
        body.status,
        body.result,
        body.error,
    )?;

    Ok(Json(TaskUpdateResponse { status: "ok" }).into_response())
}

async fn cancel_task(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
    Json(body): Json<TaskCancelRequest>,
) -> Result<Response, AppError> {
    coordinator.cancel_task(body.task_id)?;
    Ok(Json(TaskCancelResponse { status: "cancelled" }).into_response())
}

async fn status(
    State(coordinator): State<Arc<lancompute_core::Coordinator>>,
) -> Result<Response, AppError> {
    let snapshot = coordinator.snapshot();
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: coordinator.uptime_seconds(),
        nodes: NodeCounts {
            total: snapshot.total_nodes,
            online: snapshot.online_nodes,
            offline: snapshot.offline_nodes,
            busy: snapshot.busy_nodes,
        },
        tasks: TaskCounts {
            pending: snapshot.pending_tasks,
            assigned: snapshot.assigned_tasks,
            running: snapshot.running_tasks,
            completed: snapshot.completed_tasks,
            failed: snapshot.failed_tasks,
            cancelled: snapshot.cancelled_tasks,
        },
    })
    .into_response())
}
