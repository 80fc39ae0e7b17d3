use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::memory::{
    EpisodeDetails, EpisodicMemory, MemoryCategory, Outcome, SemanticMemory,
};
use crate::domain::repositories::{
    AuditEntry, AuditRepository, MemoryRepository, RepositoryError, RepositoryResult, TaskFilter,
    TaskRepository, TokenStats, TokenUsageEntry,
};
use crate::domain::task::{
    LogLevel, NewTask, StatusUpdate, Task, TaskLogEntry, TaskStats, TaskStatus,
};

/// Process-local task store
///
/// Tasks are kept in insertion order so that a stable sort on
/// (priority, created_at) breaks exact timestamp ties by submission order.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<Vec<Task>>,
    logs: Mutex<Vec<TaskLogEntry>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, input: NewTask) -> RepositoryResult<Task> {
        let task = Task::new(input).map_err(RepositoryError::Validation)?;
        self.tasks.lock().push(task.clone());
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<Task>> {
        Ok(self.tasks.lock().iter().find(|t| t.id == id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> RepositoryResult<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RepositoryError::NotFound(id))?;

        if !task.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidTransition {
                from: task.status,
                to: status,
            });
        }

        task.apply_status(status, update, Utc::now());
        Ok(task.clone())
    }

    async fn list(&self, filter: TaskFilter) -> RepositoryResult<Vec<Task>> {
        let matching: Vec<Task> = self
            .tasks
            .lock()
            .iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .assigned_agent
                    .as_deref()
                    .map_or(true, |a| t.assigned_agent.as_deref() == Some(a))
            })
            .cloned()
            .collect();

        let limit = filter.limit.unwrap_or(TaskFilter::DEFAULT_LIMIT);
        Ok(Self::ordered(matching).into_iter().take(limit).collect())
    }

    async fn next_queued(&self, agent_id: Option<&str>) -> RepositoryResult<Option<Task>> {
        let queued: Vec<Task> = self
            .tasks
            .lock()
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| match (agent_id, t.assigned_agent.as_deref()) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(wanted), Some(assigned)) => wanted == assigned,
            })
            .cloned()
            .collect();

        Ok(Self::ordered(queued).into_iter().next())
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
        self.logs.lock().push(entry.clone());
        Ok(entry)
    }

    async fn logs(&self, task_id: Uuid, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>> {
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|l| l.task_id == task_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_logs(&self, limit: usize) -> RepositoryResult<Vec<TaskLogEntry>> {
        Ok(self.logs.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> RepositoryResult<TaskStats> {
        let tasks = self.tasks.lock();
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count() as u64;

        Ok(TaskStats {
            total: tasks.len() as u64,
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            running: count(TaskStatus::Running),
            queued: count(TaskStatus::Queued),
        })
    }
}

/// Process-local memory store
#[derive(Default)]
pub struct InMemoryMemoryRepository {
    semantic: Mutex<Vec<SemanticMemory>>,
    episodic: Mutex<Vec<EpisodicMemory>>,
}

impl InMemoryMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn search_semantic(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> RepositoryResult<Vec<SemanticMemory>> {
        let mut matches: Vec<SemanticMemory> = self
            .semantic
            .lock()
            .iter()
            .filter(|m| category.map_or(true, |c| m.category == c))
            .filter(|m| m.matches(query))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn create_semantic(
        &self,
        category: MemoryCategory,
        key: &str,
        value: &str,
        source: &str,
        confidence: f64,
    ) -> RepositoryResult<SemanticMemory> {
        let now = Utc::now();
        let memory = SemanticMemory {
            id: Uuid::new_v4(),
            category,
            key: key.to_string(),
            value: value.to_string(),
            confidence,
            source: source.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.semantic.lock().push(memory.clone());
        Ok(memory)
    }

    async fn create_episodic(
        &self,
        agent_id: &str,
        summary: &str,
        outcome: Outcome,
        details: EpisodeDetails,
    ) -> RepositoryResult<EpisodicMemory> {
        let memory = EpisodicMemory {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            task_id: details.task_id,
            summary: summary.to_string(),
            context: details.context.unwrap_or_else(|| Value::Object(Default::default())),
            outcome,
            lessons: details.lessons.unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.episodic.lock().push(memory.clone());
        Ok(memory)
    }

    async fn list_episodic(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<EpisodicMemory>> {
        Ok(self
            .episodic
            .lock()
            .iter()
            .rev()
            .filter(|m| agent_id.map_or(true, |a| m.agent_id == a))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Process-local token usage and audit trail
#[derive(Default)]
pub struct InMemoryAuditRepository {
    usage: Mutex<Vec<TokenUsageEntry>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every usage row recorded so far, oldest first
    pub fn token_usage(&self) -> Vec<TokenUsageEntry> {
        self.usage.lock().clone()
    }
}

fn start_of_today() -> DateTime<Utc> {
    let today = Utc::now().date_naive();
    today.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn record_token_usage(
        &self,
        agent_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        estimated_cost: f64,
    ) -> RepositoryResult<TokenUsageEntry> {
        let entry = TokenUsageEntry {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            estimated_cost,
            created_at: Utc::now(),
        };
        self.usage.lock().push(entry.clone());
        Ok(entry)
    }

    async fn today_token_stats(&self) -> RepositoryResult<TokenStats> {
        let since = start_of_today();
        let usage = self.usage.lock();
        Ok(usage
            .iter()
            .filter(|u| u.created_at >= since)
            .fold(TokenStats::default(), |acc, u| TokenStats {
                total_tokens: acc.total_tokens + u.total_tokens,
                estimated_cost: acc.estimated_cost + u.estimated_cost,
            }))
    }

    async fn log_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        details: Option<Value>,
    ) -> RepositoryResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            created_at: Utc::now(),
        };
        self.audit.lock().push(entry.clone());
        Ok(entry)
    }

    async fn recent_audit(&self, limit: usize) -> RepositoryResult<Vec<AuditEntry>> {
        Ok(self.audit.lock().iter().rev().take(limit).cloned().collect())
    }
}
