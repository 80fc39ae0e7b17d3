use async_trait::async_trait;

use super::RepositoryResult;
use crate::domain::memory::{
    EpisodeDetails, EpisodicMemory, MemoryCategory, Outcome, SemanticMemory,
};

/// Repository trait for semantic and episodic memory
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Case-insensitive substring search on key or value, most recently
    /// updated first
    async fn search_semantic(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> RepositoryResult<Vec<SemanticMemory>>;

    /// Store a new semantic fact
    async fn create_semantic(
        &self,
        category: MemoryCategory,
        key: &str,
        value: &str,
        source: &str,
        confidence: f64,
    ) -> RepositoryResult<SemanticMemory>;

    /// Record the outcome of a task
    async fn create_episodic(
        &self,
        agent_id: &str,
        summary: &str,
        outcome: Outcome,
        details: EpisodeDetails,
    ) -> RepositoryResult<EpisodicMemory>;

    /// Episodic memories, newest first
    async fn list_episodic(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<EpisodicMemory>>;
}
