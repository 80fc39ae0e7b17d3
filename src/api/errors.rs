use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::agents::AgentError;
use crate::domain::repositories::RepositoryError;

/// API error type with HTTP status code and message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Creates a new API error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Creates a 409 Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Creates a 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match &error {
            RepositoryError::NotFound(_) => Self::not_found(error.to_string()),
            RepositoryError::InvalidTransition { .. } | RepositoryError::Conflict(_) => {
                Self::conflict(error.to_string())
            }
            RepositoryError::Validation(_) => Self::bad_request(error.to_string()),
            RepositoryError::Backend(_) => {
                tracing::error!(error = %error, "Storage failure");
                Self::internal_server_error(error.to_string())
            }
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::Repository(e) => e.into(),
            AgentError::UnknownAgent(_) => Self::not_found(error.to_string()),
            AgentError::AgentNotIdle(_) | AgentError::NotInErrorState(_) => {
                Self::conflict(error.to_string())
            }
            other => Self::internal_server_error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskStatus;
    use uuid::Uuid;

    #[test]
    fn repository_errors_map_to_status_codes() {
        let missing = ApiError::from(RepositoryError::NotFound(Uuid::nil()));
        let invalid = ApiError::from(RepositoryError::InvalidTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::Queued,
        });
        let empty =
            ApiError::from(RepositoryError::Validation("Title cannot be empty".to_string()));

        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(invalid.status, StatusCode::CONFLICT);
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn agent_errors_map_to_status_codes() {
        let unknown = ApiError::from(AgentError::UnknownAgent("x".to_string()));
        let not_error = ApiError::from(AgentError::NotInErrorState("x".to_string()));
        let wrapped =
            ApiError::from(AgentError::Repository(RepositoryError::NotFound(Uuid::nil())));

        assert_eq!(unknown.status, StatusCode::NOT_FOUND);
        assert_eq!(not_error.status, StatusCode::CONFLICT);
        assert_eq!(wrapped.status, StatusCode::NOT_FOUND);
    }
}
