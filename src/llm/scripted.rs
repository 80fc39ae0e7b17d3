//! Deterministic completion client that replays canned responses.
//!
//! Used by the test suites and for dry runs without a provider account.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ChatMessage, CompletionClient, CompletionResponse, LlmError, Pricing, ToolDescriptor};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(CompletionResponse),
    Fail(String),
}

/// What the client was asked, for assertions
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Replayed forever once `steps` runs dry
    fallback: Option<ScriptStep>,
    requests: Mutex<Vec<RecordedRequest>>,
    gate: Option<Arc<Notify>>,
    pricing: Pricing,
}

impl ScriptedClient {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Answers every call with `text` and no tool requests
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new([]).or_else(ScriptStep::Respond(CompletionResponse::text(text)))
    }

    /// Reply used once the script is exhausted
    pub fn or_else(mut self, step: ScriptStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Every call waits for one `notify_one` on `gate` before answering
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Number of `chat` calls so far
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().push(RecordedRequest {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let step = self.steps.lock().pop_front().or_else(|| self.fallback.clone());
        match step {
            Some(ScriptStep::Respond(response)) => Ok(response),
            Some(ScriptStep::Fail(message)) => Err(LlmError::Api {
                status: 503,
                message,
            }),
            None => Err(LlmError::Api {
                status: 500,
                message: "script exhausted".to_string(),
            }),
        }
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }
}
