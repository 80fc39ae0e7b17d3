// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter

pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::agents::Coordinator;
use handlers::{agents, memory, system, tasks};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

/// Operator and producer routes
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(system::health_check))
        .route("/api/snapshot", get(system::snapshot))
        // Task routes
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/logs", get(tasks::task_logs))
        .route("/api/tasks/:id/approve", post(tasks::approve_task))
        .route("/api/tasks/:id/reject", post(tasks::reject_task))
        // Agent routes
        .route("/api/agents", get(agents::list_agents))
        .route("/api/agents/:id/reset", post(agents::reset_agent))
        // Memory routes
        .route("/api/memory/search", get(memory::search_memory))
        .with_state(state)
}
