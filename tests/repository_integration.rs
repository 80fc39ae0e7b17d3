//! Integration tests for the PostgreSQL repositories
//!
//! These tests need a migrated database and are ignored by default:
//! `DATABASE_URL=... cargo test -- --ignored`

use agentdesk_gateway::domain::memory::{EpisodeDetails, MemoryCategory, Outcome};
use agentdesk_gateway::domain::repositories::{
    AuditRepository, MemoryRepository, RepositoryError, TaskFilter, TaskRepository,
};
use agentdesk_gateway::domain::task::{
    LogLevel, NewTask, Priority, StatusUpdate, TaskStatus, TaskType,
};
use agentdesk_gateway::infrastructure::repositories::{
    PostgresAuditRepository, PostgresMemoryRepository, PostgresTaskRepository,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Set up test database connection pool
async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for integration tests");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Remove tasks created by a test, logs first
async fn cleanup_tasks(pool: &PgPool, ids: &[Uuid]) {
    for id in ids {
        sqlx::query("DELETE FROM task_logs WHERE task_id = $1")
            .bind(id)
            .execute(pool)
            .await
            .expect("Failed to cleanup task logs");
    }
    for id in ids.iter().rev() {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .expect("Failed to cleanup task");
    }
}

#[tokio::test]
#[ignore]
async fn test_task_lifecycle_sets_timestamps() {
    let pool = setup_test_db().await;
    let repo = PostgresTaskRepository::new(pool.clone());

    let task = repo
        .create(NewTask::new("Repository lifecycle", TaskType::Manual).requiring_approval(false))
        .await
        .expect("create task");
    assert_eq!(task.status, TaskStatus::Created);
    assert_eq!(task.priority, Priority::default());

    repo.update_status(task.id, TaskStatus::Queued, StatusUpdate::default())
        .await
        .expect("queue task");
    let running = repo
        .update_status(task.id, TaskStatus::Running, StatusUpdate::assigned_to("general"))
        .await
        .expect("start task");
    assert!(running.started_at.is_some());
    assert_eq!(running.assigned_agent.as_deref(), Some("general"));

    let mut output = serde_json::Map::new();
    output.insert("content".to_string(), serde_json::json!("done"));
    let completed = repo
        .update_status(task.id, TaskStatus::Completed, StatusUpdate::output(output))
        .await
        .expect("complete task");
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.output.unwrap()["content"], "done");
    assert_eq!(completed.assigned_agent.as_deref(), Some("general"));

    cleanup_tasks(&pool, &[task.id]).await;
}

#[tokio::test]
#[ignore]
async fn test_invalid_transition_is_rejected() {
    let pool = setup_test_db().await;
    let repo = PostgresTaskRepository::new(pool.clone());

    let task = repo
        .create(NewTask::new("Repository invalid transition", TaskType::Manual))
        .await
        .expect("create task");

    let result = repo
        .update_status(task.id, TaskStatus::Completed, StatusUpdate::default())
        .await;
    assert!(matches!(
        result,
        Err(RepositoryError::InvalidTransition {
            from: TaskStatus::Created,
            to: TaskStatus::Completed
        })
    ));

    let missing = repo
        .update_status(Uuid::new_v4(), TaskStatus::Queued, StatusUpdate::default())
        .await;
    assert!(matches!(missing, Err(RepositoryError::NotFound(_))));

    cleanup_tasks(&pool, &[task.id]).await;
}

#[tokio::test]
#[ignore]
async fn test_next_queued_orders_by_priority_then_age() {
    let pool = setup_test_db().await;
    let repo = PostgresTaskRepository::new(pool.clone());
    let agent = format!("agent-{}", Uuid::new_v4());

    let mut ids = Vec::new();
    for (title, priority) in [("later", 4), ("urgent", 1), ("also urgent", 1)] {
        let task = repo
            .create(
                NewTask::new(format!("Ordering {}", title), TaskType::Manual)
                    .with_priority(Priority::new(priority).unwrap())
                    .with_agent(agent.clone()),
            )
            .await
            .expect("create task");
        repo.update_status(task.id, TaskStatus::Queued, StatusUpdate::default())
            .await
            .expect("queue task");
        ids.push(task.id);
    }

    let listed = repo
        .list(TaskFilter {
            status: Some(TaskStatus::Queued),
            assigned_agent: Some(agent.clone()),
            limit: None,
        })
        .await
        .expect("list tasks");
    let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Ordering urgent", "Ordering also urgent", "Ordering later"]);

    let next = repo.next_queued(Some(&agent)).await.expect("next queued");
    assert!(next.is_some());

    cleanup_tasks(&pool, &ids).await;
}

#[tokio::test]
#[ignore]
async fn test_task_logs_round_trip() {
    let pool = setup_test_db().await;
    let repo = PostgresTaskRepository::new(pool.clone());

    let task = repo
        .create(NewTask::new("Repository logs", TaskType::Manual))
        .await
        .expect("create task");
    repo.add_log(task.id, "general", LogLevel::Info, "Starting task: Repository logs", None)
        .await
        .expect("add log");
    repo.add_log(
        task.id,
        "general",
        LogLevel::Info,
        "Calling tool: search_memory",
        Some(serde_json::json!({"args": {"query": "acme"}})),
    )
    .await
    .expect("add log");

    let logs = repo.logs(task.id, 100).await.expect("read logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "Starting task: Repository logs");
    assert_eq!(logs[1].data.as_ref().unwrap()["args"]["query"], "acme");

    cleanup_tasks(&pool, &[task.id]).await;
}

#[tokio::test]
#[ignore]
async fn test_memory_search_and_episodes() {
    let pool = setup_test_db().await;
    let repo = PostgresMemoryRepository::new(pool.clone());
    let key = format!("supplier-{}", Uuid::new_v4());
    let agent = format!("agent-{}", Uuid::new_v4());

    repo.create_semantic(MemoryCategory::Supplier, &key, "Delivers on Tuesdays", "test", 1.0)
        .await
        .expect("create semantic");
    let found = repo
        .search_semantic(&key.to_uppercase(), Some(MemoryCategory::Supplier), 10)
        .await
        .expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value, "Delivers on Tuesdays");

    repo.create_episodic(
        &agent,
        "Failed task \"x\": boom",
        Outcome::Failed,
        EpisodeDetails::default(),
    )
    .await
        .expect("create episodic");
    let episodes = repo.list_episodic(Some(&agent), 10).await.expect("list episodic");
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].outcome, Outcome::Failed);

    sqlx::query("DELETE FROM semantic_memory WHERE key = $1")
        .bind(&key)
        .execute(&pool)
        .await
        .expect("cleanup semantic");
    sqlx::query("DELETE FROM episodic_memory WHERE agent_id = $1")
        .bind(&agent)
        .execute(&pool)
        .await
        .expect("cleanup episodic");
}

#[tokio::test]
#[ignore]
async fn test_memory_search_treats_wildcards_literally() {
    let pool = setup_test_db().await;
    let repo = PostgresMemoryRepository::new(pool.clone());
    let key = format!("discount-{}", Uuid::new_v4());

    repo.create_semantic(MemoryCategory::Rule, &key, "Early payment gives 2% off", "test", 1.0)
        .await
        .expect("create semantic");

    let literal = repo
        .search_semantic("2% off", Some(MemoryCategory::Rule), 100)
        .await
        .expect("search literal");
    let wildcard = repo
        .search_semantic(&format!("{}%_", &key[..9]), Some(MemoryCategory::Rule), 100)
        .await
        .expect("search wildcard");

    assert!(literal.iter().any(|m| m.key == key));
    assert!(!wildcard.iter().any(|m| m.key == key));

    sqlx::query("DELETE FROM semantic_memory WHERE key = $1")
        .bind(&key)
        .execute(&pool)
        .await
        .expect("cleanup semantic");
}

#[tokio::test]
#[ignore]
async fn test_token_usage_and_audit() {
    let pool = setup_test_db().await;
    let repo = PostgresAuditRepository::new(pool.clone());
    let agent = format!("agent-{}", Uuid::new_v4());

    let before = repo.today_token_stats().await.expect("stats");
    let row = repo
        .record_token_usage(&agent, "claude-sonnet-4-20250514", 100, 20, 0.0006)
        .await
        .expect("record usage");
    let after = repo.today_token_stats().await.expect("stats");
    assert_eq!(row.total_tokens, 120);
    assert!(after.total_tokens >= before.total_tokens + 120);

    repo.log_audit(
        &agent,
        "agent:tool_call",
        "task",
        "t-1",
        Some(serde_json::json!({"tool": "search_memory"})),
    )
    .await
        .expect("audit");
    let recent = repo.recent_audit(50).await.expect("recent audit");
    assert!(recent.iter().any(|a| a.actor == agent && a.action == "agent:tool_call"));

    sqlx::query("DELETE FROM token_usage WHERE agent_id = $1")
        .bind(&agent)
        .execute(&pool)
        .await
        .expect("cleanup usage");
    sqlx::query("DELETE FROM audit_log WHERE actor = $1")
        .bind(&agent)
        .execute(&pool)
        .await
        .expect("cleanup audit");
}
