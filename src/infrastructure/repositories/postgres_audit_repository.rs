use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::repositories::{
    AuditEntry, AuditRepository, RepositoryError, RepositoryResult, TokenStats, TokenUsageEntry,
};

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    actor: String,
    action: String,
    resource_type: String,
    resource_id: String,
    details_json: Option<Json<Value>>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(r: AuditRow) -> Self {
        AuditEntry {
            id: r.id,
            actor: r.actor,
            action: r.action,
            resource_type: r.resource_type,
            resource_id: r.resource_id,
            details: r.details_json.map(|j| j.0),
            created_at: r.created_at,
        }
    }
}

/// PostgreSQL implementation of AuditRepository
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
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

        sqlx::query(
            r#"
            INSERT INTO token_usage (
                id, agent_id, model, prompt_tokens, completion_tokens,
                total_tokens, estimated_cost, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.agent_id)
        .bind(&entry.model)
        .bind(entry.prompt_tokens as i64)
        .bind(entry.completion_tokens as i64)
        .bind(entry.total_tokens as i64)
        .bind(entry.estimated_cost)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to record token usage: {}", e)))?;

        Ok(entry)
    }

    async fn today_token_stats(&self) -> RepositoryResult<TokenStats> {
        let (total_tokens, estimated_cost): (i64, f64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(total_tokens), 0)::BIGINT,
                COALESCE(SUM(estimated_cost), 0)::DOUBLE PRECISION
            FROM token_usage
            WHERE created_at >= date_trunc('day', now() AT TIME ZONE 'utc') AT TIME ZONE 'utc'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to compute token stats: {}", e)))?;

        Ok(TokenStats {
            total_tokens: total_tokens as u64,
            estimated_cost,
        })
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

        sqlx::query(
            r#"
            INSERT INTO audit_log
                (id, actor, action, resource_type, resource_id, details_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.details.as_ref().map(Json))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to write audit log: {}", e)))?;

        Ok(entry)
    }

    async fn recent_audit(&self, limit: usize) -> RepositoryResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, actor, action, resource_type, resource_id, details_json, created_at
            FROM audit_log
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to read audit log: {}", e)))?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}
