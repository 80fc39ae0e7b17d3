use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::memory::{
    EpisodeDetails, EpisodicMemory, MemoryCategory, Outcome, SemanticMemory,
};
use crate::domain::repositories::{MemoryRepository, RepositoryError, RepositoryResult};

#[derive(FromRow)]
struct SemanticRow {
    id: Uuid,
    category: String,
    key: String,
    value: String,
    confidence: f64,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SemanticRow> for SemanticMemory {
    type Error = RepositoryError;

    fn try_from(r: SemanticRow) -> Result<Self, Self::Error> {
        Ok(SemanticMemory {
            id: r.id,
            category: r.category.parse().map_err(RepositoryError::Backend)?,
            key: r.key,
            value: r.value,
            confidence: r.confidence,
            source: r.source,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EpisodicRow {
    id: Uuid,
    agent_id: String,
    task_id: Option<Uuid>,
    summary: String,
    context_json: Json<Value>,
    outcome: String,
    lessons: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EpisodicRow> for EpisodicMemory {
    type Error = RepositoryError;

    fn try_from(r: EpisodicRow) -> Result<Self, Self::Error> {
        Ok(EpisodicMemory {
            id: r.id,
            agent_id: r.agent_id,
            task_id: r.task_id,
            summary: r.summary,
            context: r.context_json.0,
            outcome: r.outcome.parse().map_err(RepositoryError::Backend)?,
            lessons: r.lessons,
            created_at: r.created_at,
        })
    }
}

/// `ILIKE` pattern matching `query` as a literal substring
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// PostgreSQL implementation of MemoryRepository
pub struct PostgresMemoryRepository {
    pool: PgPool,
}

impl PostgresMemoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryRepository for PostgresMemoryRepository {
    async fn search_semantic(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> RepositoryResult<Vec<SemanticMemory>> {
        let pattern = like_pattern(query);

        let rows = sqlx::query_as::<_, SemanticRow>(
            r#"
            SELECT id, category, key, value, confidence, source, created_at, updated_at
            FROM semantic_memory
            WHERE ($1::text IS NULL OR category = $1)
              AND (key ILIKE $2 ESCAPE '\' OR value ILIKE $2 ESCAPE '\')
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(category.map(|c| c.as_str()))
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to search semantic memory: {}", e)))?;

        rows.into_iter().map(SemanticMemory::try_from).collect()
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

        sqlx::query(
            r#"
            INSERT INTO semantic_memory
                (id, category, key, value, confidence, source, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(memory.id)
        .bind(memory.category.as_str())
        .bind(&memory.key)
        .bind(&memory.value)
        .bind(memory.confidence)
        .bind(&memory.source)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to create semantic memory: {}", e)))?;

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

        sqlx::query(
            r#"
            INSERT INTO episodic_memory
                (id, agent_id, task_id, summary, context_json, outcome, lessons, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(memory.id)
        .bind(&memory.agent_id)
        .bind(memory.task_id)
        .bind(&memory.summary)
        .bind(Json(&memory.context))
        .bind(memory.outcome.to_string())
        .bind(&memory.lessons)
        .bind(memory.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to create episodic memory: {}", e)))?;

        Ok(memory)
    }

    async fn list_episodic(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<EpisodicMemory>> {
        let rows = sqlx::query_as::<_, EpisodicRow>(
            r#"
            SELECT id, agent_id, task_id, summary, context_json, outcome, lessons, created_at
            FROM episodic_memory
            WHERE ($1::text IS NULL OR agent_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(format!("Failed to list episodic memory: {}", e)))?;

        rows.into_iter().map(EpisodicMemory::try_from).collect()
    }
}
