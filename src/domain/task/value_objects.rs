use serde::{Deserialize, Serialize};

/// Represents the lifecycle status of a task
///
/// # Status Transitions
/// ```text
/// Created -> Queued -> Running -> Completed
///              ^          |------> Failed
///              |          └------> Review -> Completed
///              |                     |
///              └---- Rejected <------┘ (or Review -> Queued directly)
/// ```
///
/// `Assigned` is part of the declared status set but no transition leads into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
pub enum TaskStatus {
    /// Submitted by a producer, not yet queued
    Created,
    /// Waiting for an idle agent
    Queued,
    /// Declared but unreachable
    Assigned,
    /// An agent is resolving the task
    Running,
    /// Resolved, waiting for an external approval decision
    Review,
    /// Finished successfully
    Completed,
    /// The resolution loop failed or the target agent does not exist
    Failed,
    /// Review rejected; the task is requeued right after
    Rejected,
}

impl TaskStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Created -> Queued | Failed
    /// - Queued -> Running | Failed
    /// - Running -> Review | Completed | Failed
    /// - Review -> Completed | Queued | Rejected
    /// - Rejected -> Queued
    ///
    /// # Example
    /// ```
    /// use agentdesk_gateway::domain::task::value_objects::TaskStatus;
    ///
    /// assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
    /// assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Queued));
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Created, Failed)
                | (Queued, Running)
                | (Queued, Failed)
                | (Running, Review)
                | (Running, Completed)
                | (Running, Failed)
                | (Review, Completed)
                | (Review, Queued)
                | (Review, Rejected)
                | (Rejected, Queued)
        )
    }

    /// Completed and failed tasks never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "queued" => Ok(TaskStatus::Queued),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "review" => Ok(TaskStatus::Review),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "rejected" => Ok(TaskStatus::Rejected),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// How a task came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "task_type", rename_all = "lowercase")]
pub enum TaskType {
    Scheduled,
    Reactive,
    Manual,
    /// Spawned by an agent while resolving a parent task
    Chained,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Scheduled => write!(f, "scheduled"),
            TaskType::Reactive => write!(f, "reactive"),
            TaskType::Manual => write!(f, "manual"),
            TaskType::Chained => write!(f, "chained"),
        }
    }
}

/// Task priority: 1 is the most urgent, 5 the least
///
/// # Example
/// ```
/// use agentdesk_gateway::domain::task::value_objects::Priority;
///
/// assert!(Priority::new(1).is_ok());
/// assert!(Priority::new(6).is_err());
/// assert_eq!(Priority::default().value(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MOST_URGENT: Priority = Priority(1);
    pub const LEAST_URGENT: Priority = Priority(5);

    pub fn new(value: u8) -> Result<Self, String> {
        if !(1..=5).contains(&value) {
            return Err(format!("Priority must be between 1 and 5, got {}", value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
