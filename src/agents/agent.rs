use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::events::{AgentEvent, EventBus};
use super::prompts;
use super::tools::{ToolContext, ToolRegistry};
use super::types::{AgentDefinition, AgentRuntimeState, AgentStatus, ResolveOutcome};
use crate::domain::memory::{EpisodeDetails, Outcome};
use crate::domain::repositories::Stores;
use crate::domain::task::{LogLevel, Payload, Task};
use crate::llm::{ChatMessage, CompletionClient, CompletionResponse, Pricing};

/// Upper bound on completion calls for one task
pub const MAX_ITERATIONS: u32 = 10;

/// Semantic memories folded into the system prompt
const MEMORY_CONTEXT_LIMIT: usize = 10;

const THINKING_PREVIEW_CHARS: usize = 200;
const SUMMARY_PREVIEW_CHARS: usize = 500;

/// Execution engine for one agent definition
///
/// Resolves one task at a time by alternating completion calls and tool
/// dispatch until the model answers without requesting tools, an error
/// ends the run, or [`MAX_ITERATIONS`] is reached.
pub struct Agent {
    definition: AgentDefinition,
    client: Option<Arc<dyn CompletionClient>>,
    tools: ToolRegistry,
    stores: Stores,
    state: Mutex<AgentRuntimeState>,
    events: Arc<EventBus>,
}

impl Agent {
    /// Create an idle agent with the built-in tools
    pub fn new(
        definition: AgentDefinition,
        client: Arc<dyn CompletionClient>,
        stores: Stores,
    ) -> Self {
        let tools = ToolRegistry::with_builtins(&stores);
        Self::build(definition, Some(client), tools, stores, AgentStatus::Idle)
    }

    /// Create an agent that has no usable completion client
    ///
    /// Offline agents are never selected for work.
    pub fn offline(definition: AgentDefinition, stores: Stores) -> Self {
        let tools = ToolRegistry::with_builtins(&stores);
        Self::build(definition, None, tools, stores, AgentStatus::Offline)
    }

    fn build(
        definition: AgentDefinition,
        client: Option<Arc<dyn CompletionClient>>,
        tools: ToolRegistry,
        stores: Stores,
        status: AgentStatus,
    ) -> Self {
        let state = AgentRuntimeState::new(definition.id.clone(), status);
        Self {
            definition,
            client,
            tools,
            stores,
            state: Mutex::new(state),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Replace the tool registry
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Snapshot of the runtime state
    pub fn state(&self) -> AgentRuntimeState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    pub fn is_idle(&self) -> bool {
        self.status() == AgentStatus::Idle
    }

    /// Atomically move from `Idle` to `Busy` on `task_id`
    ///
    /// Fails with [`AgentError::AgentNotIdle`] when the agent is in any other
    /// status, leaving it untouched.
    pub fn try_claim(&self, task_id: Uuid) -> AgentResult<()> {
        let (snapshot, previous) = {
            let mut state = self.state.lock();
            if state.status != AgentStatus::Idle {
                return Err(AgentError::AgentNotIdle(self.definition.id.clone()));
            }
            let previous = state.status;
            state.occupy(task_id);
            (state.clone(), previous)
        };
        self.emit_status(snapshot, previous);
        Ok(())
    }

    /// Give back a claim that was never used
    pub fn release(&self) {
        self.transition(|state| {
            if state.status == AgentStatus::Busy {
                state.vacate(AgentStatus::Idle);
                true
            } else {
                false
            }
        });
    }

    /// Operator reset from `Error` back to `Idle`
    pub fn reset(&self) -> AgentResult<AgentRuntimeState> {
        let changed = self.transition(|state| {
            if state.status == AgentStatus::Error {
                state.vacate(AgentStatus::Idle);
                true
            } else {
                false
            }
        });

        if changed {
            Ok(self.state())
        } else {
            Err(AgentError::NotInErrorState(self.definition.id.clone()))
        }
    }

    /// Apply `change` under the state lock; emits `status_changed` when it
    /// reports a transition
    fn transition(&self, change: impl FnOnce(&mut AgentRuntimeState) -> bool) -> bool {
        let update = {
            let mut state = self.state.lock();
            let previous = state.status;
            change(&mut state).then(|| (state.clone(), previous))
        };

        match update {
            Some((snapshot, previous)) => {
                self.emit_status(snapshot, previous);
                true
            }
            None => false,
        }
    }

    fn emit_status(&self, agent: AgentRuntimeState, previous: AgentStatus) {
        tracing::debug!(
            agent_id = %self.definition.id,
            from = %previous,
            to = %agent.status,
            "Agent status changed"
        );
        self.events.emit(&AgentEvent::StatusChanged { agent, previous });
    }

    /// Resolve `task` to a success or failure outcome
    ///
    /// The caller guarantees the agent is idle or already claimed for this
    /// task. Never returns an error: every failure is captured into the
    /// outcome, the agent ends in `Error`, and `task_failed` is emitted.
    pub async fn resolve(&self, task: &Task) -> ResolveOutcome {
        let claimed = {
            let state = self.state.lock();
            state.status == AgentStatus::Busy && state.current_task_id == Some(task.id)
        };
        if !claimed {
            self.transition(|state| {
                state.occupy(task.id);
                true
            });
        }

        self.log(task.id, LogLevel::Info, format!("Starting task: {}", task.title), None)
            .await;

        match self.run_loop(task).await {
            Ok((content, iterations)) => self.succeed(task, content, iterations).await,
            Err(e) => self.fail(task, e).await,
        }
    }

    async fn run_loop(&self, task: &Task) -> AgentResult<(String, u32)> {
        let client = self.client.as_ref().ok_or_else(|| {
            AgentError::Configuration(format!(
                "Agent {} has no completion client",
                self.definition.id
            ))
        })?;

        let memories = self
            .stores
            .memory
            .search_semantic(&task.title, None, MEMORY_CONTEXT_LIMIT)
            .await?;
        let system_prompt = prompts::system_prompt(&self.definition, &memories);
        let tool_descriptors = self.tools.descriptors();
        let context = ToolContext {
            agent_id: self.definition.id.clone(),
            task_id: task.id,
        };

        let mut history = vec![ChatMessage::user(prompts::task_message(task))];
        let mut final_content = String::new();
        let mut iterations = 0;

        while iterations < MAX_ITERATIONS {
            iterations += 1;
            tracing::debug!(
                agent_id = %self.definition.id,
                task_id = %task.id,
                iteration = iterations,
                "Calling completion service",
            );

            let response = client
                .chat(&system_prompt, &history, &tool_descriptors)
                .await?;
            self.record_usage(&response, client.pricing()).await;

            if !response.text.is_empty() {
                final_content = response.text.clone();
                self.emit_thinking(task.id, &response.text);
                let preview: String = response.text.chars().take(THINKING_PREVIEW_CHARS).collect();
                self.log(task.id, LogLevel::Debug, format!("Agent thinking: {}", preview), None)
                    .await;
            }

            if response.tool_calls.is_empty() {
                break;
            }

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let arguments = Value::Object(call.arguments.clone());
                self.log(
                    task.id,
                    LogLevel::Info,
                    format!("Calling tool: {}", call.name),
                    Some(json!({ "args": arguments })),
                )
                .await;
                self.audit(
                    "agent:tool_call",
                    &task.id.to_string(),
                    Some(json!({ "tool": call.name, "args": arguments })),
                )
                .await;

                let result = self.tools.dispatch(call, &context).await;
                if let Err(message) = &result.result {
                    let failure = AgentError::ToolExecution {
                        tool: call.name.clone(),
                        message: message.clone(),
                    };
                    self.log(task.id, LogLevel::Error, failure.to_string(), None).await;
                }
                results.push(result);
            }

            let assistant_turn = if response.text.is_empty() {
                let names: Vec<&str> =
                    response.tool_calls.iter().map(|c| c.name.as_str()).collect();
                prompts::tools_placeholder(&names)
            } else {
                response.text
            };
            history.push(ChatMessage::assistant(assistant_turn));
            history.push(ChatMessage::user(prompts::tool_results_message(&results)));
        }

        Ok((final_content, iterations))
    }

    async fn succeed(&self, task: &Task, content: String, iterations: u32) -> ResolveOutcome {
        self.transition(|state| {
            state.vacate(AgentStatus::Idle);
            true
        });
        self.log(
            task.id,
            LogLevel::Info,
            format!("Task completed after {} iterations", iterations),
            None,
        )
        .await;

        let preview: String = content.chars().take(SUMMARY_PREVIEW_CHARS).collect();
        self.remember_episode(
            format!("Completed task \"{}\": {}", task.title, preview),
            Outcome::Success,
            EpisodeDetails {
                task_id: Some(task.id),
                context: Some(json!({ "input": task.input })),
                lessons: Some(String::new()),
            },
        )
        .await;

        let mut output = Payload::new();
        output.insert("content".to_string(), Value::String(content));
        output.insert("iterations".to_string(), json!(iterations));

        self.events.emit(&AgentEvent::TaskCompleted {
            agent: self.state(),
            task_id: task.id,
            output: output.clone(),
        });

        ResolveOutcome {
            success: true,
            output,
        }
    }

    async fn fail(&self, task: &Task, error: AgentError) -> ResolveOutcome {
        let message = error.to_string();
        tracing::warn!(
            agent_id = %self.definition.id,
            task_id = %task.id,
            error = %message,
            "Task failed"
        );
        self.transition(|state| {
            state.error_count += 1;
            state.vacate(AgentStatus::Error);
            true
        });
        self.log(task.id, LogLevel::Error, format!("Task failed: {}", message), None)
            .await;

        self.remember_episode(
            format!("Failed task \"{}\": {}", task.title, message),
            Outcome::Failed,
            EpisodeDetails {
                task_id: Some(task.id),
                context: Some(json!({ "error": message })),
                lessons: Some(message.clone()),
            },
        )
        .await;

        self.events.emit(&AgentEvent::TaskFailed {
            agent: self.state(),
            task_id: task.id,
            error: message.clone(),
        });

        let mut output = Payload::new();
        output.insert("error".to_string(), Value::String(message));
        ResolveOutcome {
            success: false,
            output,
        }
    }

    fn emit_thinking(&self, task_id: Uuid, content: &str) {
        self.events.emit(&AgentEvent::Thinking {
            agent: self.state(),
            task_id,
            content: content.to_string(),
        });
    }

    /// Write a task log line, mirror it to tracing and emit `task_log`
    async fn log(&self, task_id: Uuid, level: LogLevel, message: String, data: Option<Value>) {
        let agent_id = self.definition.id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(agent_id, task_id = %task_id, "{}", message),
            LogLevel::Info => tracing::info!(agent_id, task_id = %task_id, "{}", message),
            LogLevel::Warn => tracing::warn!(agent_id, task_id = %task_id, "{}", message),
            LogLevel::Error => tracing::error!(agent_id, task_id = %task_id, "{}", message),
        }

        if let Err(e) = self
            .stores
            .tasks
            .add_log(task_id, agent_id, level, &message, data.clone())
            .await
        {
            tracing::warn!(agent_id, task_id = %task_id, error = %e, "Failed to store task log");
        }

        self.events.emit(&AgentEvent::TaskLog {
            agent: self.state(),
            task_id,
            level,
            message,
            data,
        });
    }

    /// Add a call's tokens to the running totals and the usage ledger
    async fn record_usage(&self, response: &CompletionResponse, pricing: Pricing) {
        self.state
            .lock()
            .token_usage
            .add(response.prompt_tokens, response.completion_tokens);

        let cost = pricing.cost(response.prompt_tokens, response.completion_tokens);
        if let Err(e) = self
            .stores
            .audit
            .record_token_usage(
                &self.definition.id,
                &response.model,
                response.prompt_tokens,
                response.completion_tokens,
                cost,
            )
            .await
        {
            tracing::warn!(
                agent_id = %self.definition.id,
                error = %e,
                "Failed to record token usage",
            );
        }
    }

    async fn audit(&self, action: &str, resource_id: &str, details: Option<Value>) {
        if let Err(e) = self
            .stores
            .audit
            .log_audit(&self.definition.id, action, "task", resource_id, details)
            .await
        {
            tracing::warn!(
                agent_id = %self.definition.id,
                action,
                error = %e,
                "Failed to write audit entry",
            );
        }
    }

    async fn remember_episode(&self, summary: String, outcome: Outcome, details: EpisodeDetails) {
        if let Err(e) = self
            .stores
            .memory
            .create_episodic(&self.definition.id, &summary, outcome, details)
            .await
        {
            tracing::warn!(
                agent_id = %self.definition.id,
                error = %e,
                "Failed to record episodic memory",
            );
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("definition", &self.definition)
            .field("state", &*self.state.lock())
            .field("tools", &self.tools.len())
            .finish()
    }
}
