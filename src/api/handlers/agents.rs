use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::agents::{AgentDefinition, AgentRuntimeState};
use crate::api::errors::ApiError;
use crate::api::AppState;

/// An agent's definition next to its live state
#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub definition: AgentDefinition,
    pub state: AgentRuntimeState,
}

/// GET /api/agents
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentResponse>> {
    let agents = state
        .coordinator
        .agents()
        .iter()
        .map(|agent| AgentResponse {
            definition: agent.definition().clone(),
            state: agent.state(),
        })
        .collect();

    Json(agents)
}

/// Move an agent in error back to idle
///
/// POST /api/agents/:id/reset
pub async fn reset_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentRuntimeState>, ApiError> {
    let agent = state.coordinator.reset_agent(&id)?;
    Ok(Json(agent))
}
