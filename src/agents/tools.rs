// Tool harness
//
// Each agent owns a registry of named tools. Tool failures never escape the
// registry: they come back as a `ToolResult` carrying the error message.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::errors::AgentError;
use crate::domain::memory::MemoryCategory;
use crate::domain::repositories::{MemoryRepository, Stores, TaskRepository};
use crate::domain::task::{NewTask, Priority, StatusUpdate, TaskStatus, TaskType};
use crate::llm::{ToolCall, ToolDescriptor};

/// Who is calling a tool, and for which task
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub task_id: Uuid,
}

/// An executable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn execute(
        &self,
        context: &ToolContext,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Value>;
}

/// Outcome of one tool call: a value or an error message, never both
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub result: Result<Value, String>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            result: Ok(value),
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result: Err(message.into()),
        }
    }

    /// `"<call id>: <json>"` or `"<call id>: ERROR: <message>"`
    pub fn render(&self) -> String {
        match &self.result {
            Ok(value) => format!("{}: {}", self.call_id, value),
            Err(message) => format!("{}: ERROR: {}", self.call_id, message),
        }
    }
}

/// Name to tool mapping, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `search_memory`, `remember_fact` and `create_subtask`
    pub fn with_builtins(stores: &Stores) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SearchMemoryTool::new(Arc::clone(&stores.memory))));
        registry.register(Arc::new(RememberFactTool::new(Arc::clone(&stores.memory))));
        registry.register(Arc::new(CreateSubtaskTool::new(Arc::clone(&stores.tasks))));
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        self.tools.retain(|t| t.descriptor().name != name);
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.descriptor().name == name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call; unknown tools and tool failures become error results
    pub async fn dispatch(&self, call: &ToolCall, context: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            let error = AgentError::UnknownTool(call.name.clone());
            return ToolResult::error(&call.id, error.to_string());
        };

        match tool.execute(context, &call.arguments).await {
            Ok(value) => ToolResult::ok(&call.id, value),
            Err(e) => ToolResult::error(&call.id, format!("{:#}", e)),
        }
    }
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(
    tool: &str,
    arguments: &Map<String, Value>,
) -> anyhow::Result<T> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .with_context(|| format!("Invalid arguments for {}", tool))
}

/// Looks up semantic memories by keyword
pub struct SearchMemoryTool {
    memory: Arc<dyn MemoryRepository>,
}

#[derive(Debug, Deserialize)]
struct SearchMemoryArgs {
    query: String,
    #[serde(default)]
    category: Option<MemoryCategory>,
}

impl SearchMemoryTool {
    pub const NAME: &'static str = "search_memory";
    const LIMIT: usize = 10;

    pub fn new(memory: Arc<dyn MemoryRepository>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.to_string(),
            description: "Search stored facts and rules by keyword".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Keyword to look for"},
                    "category": {
                        "type": "string",
                        "enum": ["supplier", "client", "rule", "preference", "general"]
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(
        &self,
        _context: &ToolContext,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let args: SearchMemoryArgs = parse_arguments(Self::NAME, arguments)?;
        let memories = self
            .memory
            .search_semantic(&args.query, args.category, Self::LIMIT)
            .await?;

        Ok(Value::Array(
            memories
                .into_iter()
                .map(|m| json!({"category": m.category, "key": m.key, "value": m.value}))
                .collect(),
        ))
    }
}

/// Stores a semantic fact learned during a task
pub struct RememberFactTool {
    memory: Arc<dyn MemoryRepository>,
}

#[derive(Debug, Deserialize)]
struct RememberFactArgs {
    category: MemoryCategory,
    key: String,
    value: String,
}

impl RememberFactTool {
    pub const NAME: &'static str = "remember_fact";

    pub fn new(memory: Arc<dyn MemoryRepository>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberFactTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.to_string(),
            description: "Remember a fact, rule or preference for future tasks".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "category": {
                        "type": "string",
                        "enum": ["supplier", "client", "rule", "preference", "general"]
                    },
                    "key": {"type": "string"},
                    "value": {"type": "string"}
                },
                "required": ["category", "key", "value"]
            }),
        }
    }

    async fn execute(
        &self,
        context: &ToolContext,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let args: RememberFactArgs = parse_arguments(Self::NAME, arguments)?;
        if args.key.trim().is_empty() {
            return Err(anyhow!("key cannot be empty"));
        }

        let source = format!("agent:{}", context.agent_id);
        let memory = self
            .memory
            .create_semantic(args.category, &args.key, &args.value, &source, 1.0)
            .await?;

        Ok(json!({"stored": true, "id": memory.id}))
    }
}

/// Creates a chained follow-up task and queues it
pub struct CreateSubtaskTool {
    tasks: Arc<dyn TaskRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubtaskArgs {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    assigned_agent: Option<String>,
}

impl CreateSubtaskTool {
    pub const NAME: &'static str = "create_subtask";

    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for CreateSubtaskTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.to_string(),
            description: "Create a follow-up task; it is queued for the next free agent"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "priority": {"type": "integer", "minimum": 1, "maximum": 5},
                    "assignedAgent": {"type": "string"}
                },
                "required": ["title"]
            }),
        }
    }

    async fn execute(
        &self,
        context: &ToolContext,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let args: CreateSubtaskArgs = parse_arguments(Self::NAME, arguments)?;

        let mut input = NewTask::new(args.title, TaskType::Chained)
            .with_description(args.description)
            .with_parent(context.task_id);
        if let Some(priority) = args.priority {
            input = input.with_priority(Priority::new(priority).map_err(|e| anyhow!(e))?);
        }
        if let Some(agent) = args.assigned_agent {
            input = input.with_agent(agent);
        }

        let created = self.tasks.create(input).await?;
        let queued = self
            .tasks
            .update_status(created.id, TaskStatus::Queued, StatusUpdate::default())
            .await?;

        Ok(json!({"taskId": queued.id, "status": queued.status}))
    }
}
