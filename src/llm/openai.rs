use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{
    ChatMessage, CompletionClient, CompletionResponse, LlmError, Pricing, ToolCall, ToolDescriptor,
};
use crate::config::{ModelConfig, Provider};

/// Client for OpenAI-style chat completion endpoints (OpenAI, OpenRouter, Ollama)
pub struct OpenAiCompatibleClient {
    client: Client,
    headers: header::HeaderMap,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    pricing: Pricing,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn default_endpoint(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        Provider::Ollama => "http://localhost:11434/v1/chat/completions",
        Provider::OpenAi | Provider::Anthropic => "https://api.openai.com/v1/chat/completions",
    }
}

/// Arguments arrive as a JSON string; anything that is not an object is kept
/// under `raw` so the tool can report a useful error.
fn parse_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("raw".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ModelConfig, api_key: Option<&str>) -> Result<Self, LlmError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| LlmError::Configuration(format!("Invalid API key format: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(Self {
            client: Client::new(),
            headers,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_endpoint(config.provider).to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            pricing: config.pricing(),
        })
    }

    fn build_request<'a>(
        &'a self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> ChatRequest<'a> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(json!({"role": "system", "content": system_prompt}));
        wire.extend(
            messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );

        ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: wire,
            tools: tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        }
    }
}

fn into_response(model: &str, body: ChatResponse) -> Result<CompletionResponse, LlmError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| ToolCall::new(c.id, c.function.name, parse_arguments(&c.function.arguments)))
        .collect();
    let usage = body.usage.unwrap_or(Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        model: body.model.unwrap_or_else(|| model.to_string()),
        stop_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
    })
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse, LlmError> {
        let request = self.build_request(system_prompt, messages, tools);

        tracing::debug!(
            model = %self.model,
            endpoint = %self.endpoint,
            "Sending chat completion request",
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        into_response(&self.model, body)
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }
}
