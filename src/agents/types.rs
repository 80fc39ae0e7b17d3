use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::Payload;

/// Static description of an agent, loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// Capability tags, matched against task text during assignment
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Model id from the models catalogue
    #[serde(default)]
    pub model_preference: Option<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

impl AgentDefinition {
    /// Number of capability tags contained in `text`
    ///
    /// `text` must already be lowercased.
    pub fn capability_score(&self, text: &str) -> usize {
        self.capabilities
            .iter()
            .filter(|cap| text.contains(&cap.to_lowercase()))
            .count()
    }
}

/// Agent status
///
/// # Status Transitions
/// ```text
/// Idle -> Busy -> Idle
///           └---> Error -> Idle (operator reset)
/// Offline (no usable completion client, never leaves)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Cumulative token counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, prompt: u64, completion: u64) {
        self.prompt += prompt;
        self.completion += completion;
        self.total += prompt + completion;
    }
}

/// Mutable state of one registered agent
///
/// # Invariants
/// - `status == Busy` if and only if `current_task_id` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeState {
    pub id: Uuid,
    pub definition_id: String,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    pub last_activity: DateTime<Utc>,
    pub token_usage: TokenUsage,
    pub error_count: u32,
}

impl AgentRuntimeState {
    pub fn new(definition_id: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            status: if status == AgentStatus::Busy {
                AgentStatus::Idle
            } else {
                status
            },
            current_task_id: None,
            last_activity: Utc::now(),
            token_usage: TokenUsage::default(),
            error_count: 0,
        }
    }

    /// Take on a task: status becomes `Busy`
    pub(crate) fn occupy(&mut self, task_id: Uuid) {
        self.status = AgentStatus::Busy;
        self.current_task_id = Some(task_id);
        self.last_activity = Utc::now();
    }

    /// Drop the current task and settle in a non-busy status
    pub(crate) fn vacate(&mut self, status: AgentStatus) {
        self.status = if status == AgentStatus::Busy {
            AgentStatus::Idle
        } else {
            status
        };
        self.current_task_id = None;
        self.last_activity = Utc::now();
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == AgentStatus::Busy) == self.current_task_id.is_some()
    }
}

/// Result of resolving one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub success: bool,
    /// `{content, iterations}` on success, `{error}` on failure
    pub output: Payload,
}
