use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::repositories::{RepositoryError, RepositoryResult, TaskFilter, TaskRepository};
use crate::domain::task::{
    LogLevel, NewTask, Payload, Priority, StatusUpdate, Task, TaskLogEntry, TaskStats, TaskStatus,
    TaskType,
};

const TASK_COLUMNS: &str = "id, title, description, task_type, status, priority, assigned_agent, \
     parent_task_id, input_json, output_json, requires_approval, \
     created_at, started_at, completed_at";

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    task_type: TaskType,
    status: TaskStatus,
    priority: i16,
    assigned_agent: Option<String>,
    parent_task_id: Option<Uuid>,
    input_json: Json<Payload>,
    output_json: Option<Json<Payload>>,
    requires_approval: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = RepositoryError;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        let priority = u8::try_from(r.priority)
            .map_err(|e| e.to_string())
            .and_then(Priority::new)
            .map_err(RepositoryError::Backend)?;

        Ok(Task {
            id: r.id,
            title: r.title,
            description: r.description,
            task_type: r.task_type,
            status: r.status,
            priority,
            assigned_agent: r.assigned_agent,
            parent_task_id: r.parent_task_id,
            input: r.input_json.0,
            output: r.output_json.map(|j| j.0),
            requires_approval: r.requires_approval,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(FromRow)]
struct LogRow {
    id: Uuid,
    task_id: Uuid,
    agent_id: String,
    level: String,
    message: String,
    data_json: Option<Json<Value>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for TaskLogEntry {
    type Error = RepositoryError;

    fn try_from(r: LogRow) -> Result<Self, Self::Error> {
        Ok(TaskLogEntry {
            id: r.id,
            task_id: r.task_id,
            agent_id: r.agent_id,
            level: r.level.parse().map_err(RepositoryError::Backend)?,
            message: r.message,
            data: r.data_json.map(|j| j.0),
            timestamp: r.created_at,
        })
    }
}

fn backend(context: &str) -> impl Fn(sqlx::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::Backend(format!("{}: {}", context, e))
}

/// PostgreSQL implementation of TaskRepository
///
/// Status updates are conditional on the status read just before, so a
/// concurrent writer turns the second update into [`RepositoryError::Conflict`].
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    /// Creates a new PostgresTaskRepository
    ///
    /// # Arguments
    /// * `pool` - SQLx connection pool for PostgreSQL
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, input: NewTask) -> RepositoryResult<Task> {
        let task = Task::new(input).map_err(RepositoryError::Validation)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, description, task_type, status, priority, assigned_agent,
                parent_task_id, input_json, output_json, requires_approval, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10, $11)
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.task_type)
        .bind(task.status)
        .bind(i16::from(task.priority.value()))
        .bind(&task.assigned_agent)
        .bind(task.parent_task_id)
        .bind(Json(&task.input))
        .bind(task.requires_approval)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to create task"))?;

        Ok(task)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to find task by id"))?;

        row.map(Task::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> RepositoryResult<Task> {
        let current = self.get(id).await?.ok_or(RepositoryError::NotFound(id))?;
        if !current.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let mut next = current.clone();
        next.apply_status(status, update, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, assigned_agent = $3, output_json = $4,
                started_at = $5, completed_at = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(id)
        .bind(next.status)
        .bind(&next.assigned_agent)
        .bind(next.output.as_ref().map(Json))
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(current.status)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to update task status"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(id));
        }

        Ok(next)
    }

    async fn list(&self, filter: TaskFilter) -> RepositoryResult<Vec<Task>> {
        let limit = filter.limit.unwrap_or(TaskFilter::DEFAULT_LIMIT) as i64;

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE ($1::task_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR assigned_agent = $2)
            ORDER BY priority ASC, created_at ASC
            LIMIT $3
            "#,
            TASK_COLUMNS
        ))
        .bind(filter.status)
        .bind(filter.assigned_agent)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list tasks"))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn next_queued(&self, agent_id: Option<&str>) -> RepositoryResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE status = 'queued'
              AND ($1::text IS NULL OR assigned_agent IS NULL OR assigned_agent = $1)
            ORDER BY priority ASC, created_at ASC
            LIMIT 1
            "#,
            TASK_COLUMNS
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to fetch next queued task"))?;

        row.map(Task::try_from).transpose()
    }

    async fn add_log(
        &self,
        task_id: Uuid,
        agent_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> RepositoryResult<TaskLogEntry> {
        let entry = TaskLogEntry {
            id: Uuid::new_v4(),
            task_id,
            agent_id: agent_id.to_string(),
            level,
            message: message.to_string(),
            data,
            timestamp: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO task_logs (id, task_id, agent_id, level, message, data_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.task_id)
        .bind(&entry.agent_id)
        .bind(entry.level.to_string())
        .bind(&entry.message)
        .bind(entry.data.as_ref().map(Json))
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to add task log"))?;

        Ok(entry)
    }

    async fn logs(&self, task_id: Uuid, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, task_id, agent_id, level, message, data_json, created_at
            FROM task_logs WHERE task_id = $1
            ORDER BY created_at ASC LIMIT $2
            "#,
        )
        .bind(task_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to fetch task logs"))?;

        rows.into_iter().map(TaskLogEntry::try_from).collect()
    }

    async fn recent_logs(&self, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, task_id, agent_id, level, message, data_json, created_at
            FROM task_logs
            ORDER BY created_at DESC LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to fetch recent logs"))?;

        rows.into_iter().map(TaskLogEntry::try_from).collect()
    }

    async fn stats(&self) -> RepositoryResult<TaskStats> {
        let (total, completed, failed, running, queued): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    COUNT(*) FILTER (WHERE status = 'running'),
                    COUNT(*) FILTER (WHERE status = 'queued')
                FROM tasks
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(backend("Failed to compute task stats"))?;

        Ok(TaskStats {
            total: total as u64,
            completed: completed as u64,
            failed: failed as u64,
            running: running as u64,
            queued: queued as u64,
        })
    }
}
