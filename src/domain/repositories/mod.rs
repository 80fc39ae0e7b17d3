// Repository traits (ports)
// Infrastructure adapters implement these; the agent runtime only sees the traits

pub mod audit_repository;
pub mod memory_repository;
pub mod task_repository;

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::TaskStatus;

pub use audit_repository::{AuditEntry, AuditRepository, TokenStats, TokenUsageEntry};
pub use memory_repository::MemoryRepository;
pub use task_repository::{TaskFilter, TaskRepository};

/// Errors surfaced by repository implementations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Backend(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Handles to the three external stores the agent runtime consumes
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskRepository>,
    pub memory: Arc<dyn MemoryRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Stores {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        memory: Arc<dyn MemoryRepository>,
        audit: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            tasks,
            memory,
            audit,
        }
    }
}
