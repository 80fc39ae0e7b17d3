use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::RepositoryResult;

/// Tokens spent by one completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageEntry {
    pub id: Uuid,
    pub agent_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub created_at: DateTime<Utc>,
}

/// Summed usage over a period
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

/// Who did what to which resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Repository trait for token accounting and the audit trail
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record_token_usage(
        &self,
        agent_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        estimated_cost: f64,
    ) -> RepositoryResult<TokenUsageEntry>;

    /// Usage since UTC midnight
    async fn today_token_stats(&self) -> RepositoryResult<TokenStats>;

    async fn log_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        details: Option<Value>,
    ) -> RepositoryResult<AuditEntry>;

    /// Newest first
    async fn recent_audit(&self, limit: usize) -> RepositoryResult<Vec<AuditEntry>>;
}
