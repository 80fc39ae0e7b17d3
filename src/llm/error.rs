use thiserror::Error;

/// Errors raised while talking to a completion service
#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing credential or unusable provider settings; raised at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Completion service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode completion response: {0}")]
    Decode(String),
}
