use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ChatMessage, CompletionClient, CompletionResponse, LlmError, Pricing, ToolCall, ToolDescriptor,
};
use crate::config::ModelConfig;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    pricing: Pricing,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig, api_key: &str) -> Result<Self, LlmError> {
        let mut auth_headers = header::HeaderMap::new();
        let auth_value = header::HeaderValue::from_str(api_key)
            .map_err(|e| LlmError::Configuration(format!("Invalid API key format: {}", e)))?;
        auth_headers.insert("x-api-key", auth_value);
        auth_headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(API_VERSION),
        );

        Ok(Self {
            client: Client::new(),
            auth_headers,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            pricing: config.pricing(),
        })
    }
}

fn into_response(model: &str, body: MessagesResponse) -> CompletionResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in body.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                tool_calls.push(ToolCall::new(id, name, arguments));
            }
            ContentBlock::Other => {}
        }
    }

    CompletionResponse {
        text: texts.join("\n"),
        tool_calls,
        prompt_tokens: body.usage.input_tokens,
        completion_tokens: body.usage.output_tokens,
        model: model.to_string(),
        stop_reason: body.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system_prompt,
            messages,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending request to Anthropic",
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.auth_headers.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        Ok(into_response(&self.model, body))
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_and_tool_use_blocks() {
        let body: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Looking up the client."},
                {
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": "search_memory",
                    "input": {"query": "ACME"}
                },
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 120, "output_tokens": 30}
        }))
        .unwrap();

        let response = into_response("claude-sonnet", body);

        assert_eq!(response.text, "Looking up the client.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search_memory");
        assert_eq!(response.tool_calls[0].arguments["query"], "ACME");
        assert_eq!(response.prompt_tokens, 120);
        assert_eq!(response.completion_tokens, 30);
        assert_eq!(response.stop_reason, "tool_use");
    }

    #[test]
    fn request_omits_empty_tool_list() {
        let messages = vec![ChatMessage::user("hi")];
        let request = MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            system: "s",
            messages: &messages,
            tools: Vec::new(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
