// Agent system modules
//
// This module contains the agent runtime: the per-agent resolution loop,
// the tool harness, and the coordinator that assigns queued tasks to agents.

pub mod agent;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod poller;
pub mod prompts;
pub mod tools;
pub mod types;

// Re-export main types
pub use agent::{Agent, MAX_ITERATIONS};
pub use coordinator::{Assignment, Coordinator};
pub use errors::{AgentError, AgentResult};
pub use events::{AgentEvent, EventBus, Subscription};
pub use poller::Poller;
pub use tools::{Tool, ToolContext, ToolRegistry, ToolResult};
pub use types::{AgentDefinition, AgentRuntimeState, AgentStatus, ResolveOutcome, TokenUsage};
