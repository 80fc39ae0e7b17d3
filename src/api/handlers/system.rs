use axum::{extract::State, Json};
use serde::Serialize;

use crate::agents::AgentRuntimeState;
use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::domain::repositories::TokenStats;
use crate::domain::task::{TaskLogEntry, TaskStats};

const SNAPSHOT_LOG_LIMIT: usize = 50;

/// Everything an operator console needs on first load
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub agents: Vec<AgentRuntimeState>,
    pub stats: TaskStats,
    pub recent_logs: Vec<TaskLogEntry>,
    pub token_stats: TokenStats,
}

/// Liveness check
///
/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// Current agents, task counts, recent logs and today's token spend
///
/// GET /api/snapshot
pub async fn snapshot(State(state): State<AppState>) -> Result<Json<SnapshotResponse>, ApiError> {
    let stores = state.coordinator.stores();

    Ok(Json(SnapshotResponse {
        agents: state.coordinator.agent_states(),
        stats: stores.tasks.stats().await?,
        recent_logs: stores.tasks.recent_logs(SNAPSHOT_LOG_LIMIT).await?,
        token_stats: stores.audit.today_token_stats().await?,
    }))
}
