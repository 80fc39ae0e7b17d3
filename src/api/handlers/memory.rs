use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::errors::ApiError;
use crate::api::AppState;
use crate::domain::memory::{MemoryCategory, SemanticMemory};

const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub category: Option<MemoryCategory>,
    pub limit: Option<usize>,
}

/// Search semantic memory by keyword
///
/// GET /api/memory/search?q=&category=
pub async fn search_memory(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SemanticMemory>>, ApiError> {
    if query.q.trim().is_empty() {
        return Err(ApiError::bad_request("Query cannot be empty"));
    }

    let memories = state
        .coordinator
        .stores()
        .memory
        .search_semantic(&query.q, query.category, query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;

    Ok(Json(memories))
}
