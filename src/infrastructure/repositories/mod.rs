// Repository implementations (data access layer)
// Adapters that implement domain repository interfaces

pub mod in_memory;
pub mod postgres_audit_repository;
pub mod postgres_memory_repository;
pub mod postgres_task_repository;

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::repositories::Stores;

pub use in_memory::{InMemoryAuditRepository, InMemoryMemoryRepository, InMemoryTaskRepository};
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_memory_repository::PostgresMemoryRepository;
pub use postgres_task_repository::PostgresTaskRepository;

/// Stores backed by a PostgreSQL pool
pub fn postgres_stores(pool: PgPool) -> Stores {
    Stores::new(
        Arc::new(PostgresTaskRepository::new(pool.clone())),
        Arc::new(PostgresMemoryRepository::new(pool.clone())),
        Arc::new(PostgresAuditRepository::new(pool)),
    )
}

/// Stores that live only as long as the process
pub fn in_memory_stores() -> Stores {
    Stores::new(
        Arc::new(InMemoryTaskRepository::new()),
        Arc::new(InMemoryMemoryRepository::new()),
        Arc::new(InMemoryAuditRepository::new()),
    )
}
