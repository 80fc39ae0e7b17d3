use super::value_objects::{Priority, TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Structured task payload (input and output)
pub type Payload = Map<String, Value>;

/// Producer input for a new task
///
/// Everything except `title` and `type` is optional and defaulted by
/// [`Task::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    #[serde(default)]
    pub input: Option<Payload>,
    #[serde(default)]
    pub requires_approval: Option<bool>,
}

impl NewTask {
    /// Minimal input with every optional field left to its default
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            task_type,
            priority: None,
            assigned_agent: None,
            parent_task_id: None,
            input: None,
            requires_approval: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent_id.into());
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    pub fn requiring_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = Some(requires_approval);
        self
    }
}

/// A unit of work dispatched to agents
///
/// Tasks live in the external task store; the orchestration core only
/// references them by id and moves them through [`TaskStatus`].
///
/// # Invariants
/// - Title cannot be empty
/// - `started_at` is set on first entry into `Running`
/// - `completed_at` is set on entry into `Completed` or `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_agent: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub input: Payload,
    pub output: Option<Payload>,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a new task in `Created` status
    ///
    /// # Business Rules Enforced
    /// - Title must not be empty
    /// - Priority defaults to 3, approval defaults to required
    ///
    /// # Example
    /// ```
    /// use agentdesk_gateway::domain::task::{NewTask, Task, TaskStatus, TaskType};
    ///
    /// let input = NewTask::new("Invoice reminder", TaskType::Manual);
    /// let task = Task::new(input).expect("valid task");
    /// assert_eq!(task.status, TaskStatus::Created);
    /// assert!(task.requires_approval);
    /// ```
    pub fn new(input: NewTask) -> Result<Self, String> {
        if input.title.trim().is_empty() {
            return Err("Title cannot be empty".to_string());
        }

        Ok(Self {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            task_type: input.task_type,
            status: TaskStatus::Created,
            priority: input.priority.unwrap_or_default(),
            assigned_agent: input.assigned_agent,
            parent_task_id: input.parent_task_id,
            input: input.input.unwrap_or_default(),
            output: None,
            requires_approval: input.requires_approval.unwrap_or(true),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Applies a status change and its timestamp side effects
    ///
    /// Callers are expected to have validated the transition already.
    pub fn apply_status(&mut self, status: TaskStatus, update: StatusUpdate, now: DateTime<Utc>) {
        if status == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            self.completed_at = Some(now);
        }
        if let Some(agent) = update.assigned_agent {
            self.assigned_agent = Some(agent);
        }
        if let Some(output) = update.output {
            self.output = Some(output);
        }
        self.status = status;
    }
}

/// Optional fields replaced alongside a status change
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub output: Option<Payload>,
    pub assigned_agent: Option<String>,
}

impl StatusUpdate {
    pub fn output(output: Payload) -> Self {
        Self {
            output: Some(output),
            assigned_agent: None,
        }
    }

    pub fn assigned_to(agent_id: impl Into<String>) -> Self {
        Self {
            output: None,
            assigned_agent: Some(agent_id.into()),
        }
    }
}

/// Severity of a task log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

/// One line of an agent's progress on a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts across the task store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    pub queued: u64,
}
