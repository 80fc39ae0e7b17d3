//! Completion service client.
//!
//! The agent runtime only depends on the [`CompletionClient`] capability;
//! one implementation exists per provider and [`build_client`] picks it from
//! configuration when the process starts.

mod anthropic;
mod error;
mod openai;
pub mod scripted;

pub use anthropic::AnthropicClient;
pub use error::LlmError;
pub use openai::OpenAiCompatibleClient;
pub use scripted::ScriptedClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ModelConfig, Provider};

/// Role in a chat conversation. The system prompt travels separately.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A callable tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Opaque identifier chosen by the provider
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One model response.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model: String,
    pub stop_reason: String,
}

impl CompletionResponse {
    /// A plain text answer with no tool requests.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            model: String::new(),
            stop_reason: "end_turn".to_string(),
        }
    }

    /// A response requesting tool calls.
    pub fn tool_use(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            stop_reason: "tool_use".to_string(),
            ..Self::text(text)
        }
    }

    pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Per-token prices used to estimate the cost of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pricing {
    pub per_input_token: f64,
    pub per_output_token: f64,
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        prompt_tokens as f64 * self.per_input_token
            + completion_tokens as f64 * self.per_output_token
    }
}

/// Capability the agent consumes to obtain a model response.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the system prompt, full history and tool list; fails on
    /// transport or authentication errors.
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse, LlmError>;

    /// Prices used for token accounting. Zero unless configured.
    fn pricing(&self) -> Pricing {
        Pricing::default()
    }
}

/// Build the client for a configured model.
///
/// Fails with [`LlmError::Configuration`] when the credential environment
/// variable is missing (Ollama runs locally and needs none).
pub fn build_client(config: &ModelConfig) -> Result<Arc<dyn CompletionClient>, LlmError> {
    let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

    match config.provider {
        Provider::Anthropic => {
            let key = api_key.ok_or_else(|| missing_key(config))?;
            Ok(Arc::new(AnthropicClient::new(config, &key)?))
        }
        Provider::OpenAi | Provider::OpenRouter => {
            let key = api_key.ok_or_else(|| missing_key(config))?;
            Ok(Arc::new(OpenAiCompatibleClient::new(config, Some(&key))?))
        }
        Provider::Ollama => Ok(Arc::new(OpenAiCompatibleClient::new(config, api_key.as_deref())?)),
    }
}

fn missing_key(config: &ModelConfig) -> LlmError {
    LlmError::Configuration(format!(
        "Missing API key: set {} environment variable",
        config.api_key_env
    ))
}
