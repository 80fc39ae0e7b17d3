// Memory domain module
// Semantic memory is a searchable fact store; episodic memory records past task outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Category of a semantic fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Supplier,
    Client,
    Rule,
    Preference,
    General,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Supplier => "supplier",
            MemoryCategory::Client => "client",
            MemoryCategory::Rule => "rule",
            MemoryCategory::Preference => "preference",
            MemoryCategory::General => "general",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supplier" => Ok(MemoryCategory::Supplier),
            "client" => Ok(MemoryCategory::Client),
            "rule" => Ok(MemoryCategory::Rule),
            "preference" => Ok(MemoryCategory::Preference),
            "general" => Ok(MemoryCategory::General),
            other => Err(format!("Unknown memory category: {}", other)),
        }
    }
}

/// A fact or rule consulted read-only when building system prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMemory {
    pub id: Uuid,
    pub category: MemoryCategory,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SemanticMemory {
    /// Case-insensitive substring match on key or value
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.key.to_lowercase().contains(&query) || self.value.to_lowercase().contains(&query)
    }
}

/// Outcome recorded with an episodic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Partial => write!(f, "partial"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "partial" => Ok(Outcome::Partial),
            "failed" => Ok(Outcome::Failed),
            other => Err(format!("Unknown outcome: {}", other)),
        }
    }
}

/// Write-only record of a past task outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicMemory {
    pub id: Uuid,
    pub agent_id: String,
    pub task_id: Option<Uuid>,
    pub summary: String,
    pub context: Value,
    pub outcome: Outcome,
    pub lessons: String,
    pub created_at: DateTime<Utc>,
}

/// Optional fields of an episodic memory
#[derive(Debug, Clone, Default)]
pub struct EpisodeDetails {
    pub task_id: Option<Uuid>,
    pub context: Option<Value>,
    pub lessons: Option<String>,
}
