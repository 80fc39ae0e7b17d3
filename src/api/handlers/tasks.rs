use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::domain::repositories::TaskFilter;
use crate::domain::task::{NewTask, Task, TaskLogEntry, TaskStatus};

const DEFAULT_LOG_LIMIT: usize = 100;

/// Query string for listing tasks
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub assigned_agent: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// Optional body of a rejection
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// Submit a task; it is queued and dispatched in the background
///
/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state.coordinator.submit(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// List tasks by priority, then age
///
/// GET /api/tasks?status=&assignedAgent=&limit=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = TaskFilter {
        status: query.status,
        assigned_agent: query.assigned_agent,
        limit: query.limit,
    };
    let tasks = state.coordinator.stores().tasks.list(filter).await?;
    Ok(Json(tasks))
}

/// Get a task by ID
///
/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .coordinator
        .stores()
        .tasks
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {}", id)))?;

    Ok(Json(task))
}

/// Log lines of a task, oldest first
///
/// GET /api/tasks/:id/logs
pub async fn task_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<TaskLogEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let logs = state.coordinator.stores().tasks.logs(id, limit).await?;
    Ok(Json(logs))
}

/// Approve a task waiting in review
///
/// POST /api/tasks/:id/approve
pub async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state.coordinator.approve(id).await?;
    Ok(Json(task))
}

/// Reject a task waiting in review and put it back in the queue
///
/// POST /api/tasks/:id/reject
pub async fn reject_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<Task>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let task = state.coordinator.reject(id, reason).await?;
    Ok(Json(task))
}
