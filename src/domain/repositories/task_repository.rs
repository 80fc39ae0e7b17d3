use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::RepositoryResult;
use crate::domain::task::{
    LogLevel, NewTask, StatusUpdate, Task, TaskLogEntry, TaskStats, TaskStatus,
};

/// Filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_agent: Option<String>,
    /// Defaults to 100 when unset
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Repository trait for tasks and their logs
///
/// Every listing is ordered by priority ascending, then creation time
/// ascending. Status updates are compare-and-swap: implementations must
/// reject transitions outside [`TaskStatus::can_transition_to`] and must not
/// overwrite a status that changed since it was read.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task in `Created` status
    async fn create(&self, input: NewTask) -> RepositoryResult<Task>;

    /// Find a task by its ID
    async fn get(&self, id: Uuid) -> RepositoryResult<Option<Task>>;

    /// Move a task to `status`, replacing output/assignee when supplied
    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> RepositoryResult<Task>;

    /// List tasks matching the filter
    async fn list(&self, filter: TaskFilter) -> RepositoryResult<Vec<Task>>;

    /// First queued task, optionally restricted to tasks that are unassigned
    /// or assigned to `agent_id`
    async fn next_queued(&self, agent_id: Option<&str>) -> RepositoryResult<Option<Task>>;

    /// Append a log line to a task
    async fn add_log(
        &self,
        task_id: Uuid,
        agent_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> RepositoryResult<TaskLogEntry>;

    /// Logs of one task, oldest first
    async fn logs(&self, task_id: Uuid, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>>;

    /// Most recent logs across all tasks, newest first
    async fn recent_logs(&self, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>>;

    /// Counts by status
    async fn stats(&self) -> RepositoryResult<TaskStats>;
}
