use crate::app_error::ApiError;
use crate::controllers::api_response::ApiResponse;
use crate::services::generation_queue::{QueueStatus, TaskState};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RemovedTask {
    removed_task_id: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearedQueue {
    removed_count: usize,
}

pub async fn get_queue(State(state): State<AppState>) -> Json<ApiResponse<QueueStatus>> {
    let status = state.queue.lock().await.snapshot();
    ApiResponse::ok(format!("Queue has {} tasks", status.total_tasks), status)
}

pub async fn get_task_status(
    State(state): State<AppState>,
    task_id: Result<Path<u64>, PathRejection>,
) -> Result<Json<ApiResponse<TaskState>>, ApiError> {
    let Path(task_id) = task_id?;
    let task_state = state.queue.lock().await.status(task_id)?;
    let message = match task_state {
        TaskState::Finished(_) => "Task completed".to_string(),
        TaskState::Pending(_) => format!("Task {} status", task_id),
    };
    Ok(ApiResponse::ok(message, task_state))
}

pub async fn delete_task(
    State(state): State<AppState>,
    task_id: Result<Path<u64>, PathRejection>,
) -> Result<Json<ApiResponse<RemovedTask>>, ApiError> {
    let Path(task_id) = task_id?;
    state.queue.lock().await.remove(task_id)?;
    Ok(ApiResponse::ok(
        format!("Task {} removed from queue", task_id),
        RemovedTask {
            removed_task_id: task_id,
        },
    ))
}

pub async fn delete_queue(State(state): State<AppState>) -> Json<ApiResponse<ClearedQueue>> {
    let removed_count = state.queue.lock().await.clear();
    ApiResponse::ok(
        format!("Cleared {} tasks from queue", removed_count),
        ClearedQueue { removed_count },
    )
}
