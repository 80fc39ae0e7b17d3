use thiserror::Error;

use crate::domain::repositories::RepositoryError;
use crate::llm::LlmError;

/// Errors that can occur in the agent system
#[derive(Debug, Error)]
pub enum AgentError {
    /// The completion call itself failed; ends the resolution loop
    #[error("{0}")]
    Completion(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Agent {0} not found")]
    UnknownAgent(String),

    #[error("Agent {0} is not idle")]
    AgentNotIdle(String),

    #[error("Agent {0} is not in error state")]
    NotInErrorState(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_task_output_format() {
        assert_eq!(
            AgentError::UnknownAgent("billing".to_string()).to_string(),
            "Agent billing not found"
        );
        assert_eq!(
            AgentError::UnknownTool("fly".to_string()).to_string(),
            "Unknown tool: fly"
        );
    }

    #[test]
    fn completion_errors_keep_the_service_message() {
        let error = AgentError::from(LlmError::Api {
            status: 401,
            message: "invalid x-api-key".to_string(),
        });

        assert_eq!(
            error.to_string(),
            "Completion service returned 401: invalid x-api-key"
        );
    }
}
