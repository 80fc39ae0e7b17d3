// Prompt templates for LLM interactions
//
// Templates use `{{name}}` placeholders. The builders below assemble the
// system prompt and the opening task message for the resolution loop.

use std::collections::HashMap;

use super::tools::ToolResult;
use super::types::AgentDefinition;
use crate::domain::memory::SemanticMemory;
use crate::domain::task::Task;

/// Prompt template structure
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub system: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the system template with variables
    pub fn render_system(&self, variables: &HashMap<String, String>) -> String {
        substitute(&self.system, variables)
    }

    /// Render the user template with variables
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        substitute(&self.user_template, variables)
    }
}

/// Replace every `{{key}}`; unknown placeholders are left as they are
fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match variables.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub mod library {
    use super::PromptTemplate;

    pub fn task_resolution() -> PromptTemplate {
        PromptTemplate {
            name: "task_resolution".to_string(),
            version: "1.0.0".to_string(),
            system: "You are {{name}}, a specialized AI agent.\n\
                     Role: {{role}}\n\
                     Description: {{description}}\n\
                     Capabilities: {{capabilities}}\n\
                     \n\
                     You are part of an agent coordination system. \
                     Execute tasks efficiently and accurately.\n\
                     When you need to perform actions, use the available tools.\n\
                     When your task is complete, provide a clear summary of what was done.\n"
                .to_string(),
            user_template: "Task: {{title}}\n".to_string(),
        }
    }
}

/// System prompt for one agent, with relevant memories appended
pub fn system_prompt(definition: &AgentDefinition, memories: &[SemanticMemory]) -> String {
    let variables = HashMap::from([
        ("name".to_string(), definition.name.clone()),
        ("role".to_string(), definition.role.clone()),
        ("description".to_string(), definition.description.clone()),
        ("capabilities".to_string(), definition.capabilities.join(", ")),
    ]);
    let mut prompt = library::task_resolution().render_system(&variables);

    if !memories.is_empty() {
        prompt.push_str("\n\nRelevant memories:\n");
        let lines: Vec<String> = memories
            .iter()
            .map(|m| format!("- [{}] {}: {}", m.category, m.key, m.value))
            .collect();
        prompt.push_str(&lines.join("\n"));
    }

    prompt
}

/// Opening user message describing the task
pub fn task_message(task: &Task) -> String {
    let variables = HashMap::from([("title".to_string(), task.title.clone())]);
    let mut message = library::task_resolution().render(&variables);

    if !task.description.is_empty() {
        message.push_str(&format!("Description: {}\n", task.description));
    }
    if !task.input.is_empty() {
        let input = serde_json::to_string_pretty(&task.input).unwrap_or_default();
        message.push_str(&format!("Input:\n{}\n", input));
    }
    message.push_str(&format!(
        "\nPriority: {} (1=urgent, 5=background)\nType: {}\n",
        task.priority, task.task_type
    ));

    message
}

/// Assistant turn recorded when the model asked for tools without text
pub fn tools_placeholder(tool_names: &[&str]) -> String {
    format!("[Used tools: {}]", tool_names.join(", "))
}

/// User turn carrying every tool result back to the model
pub fn tool_results_message(results: &[ToolResult]) -> String {
    let lines: Vec<String> = results.iter().map(ToolResult::render).collect();
    format!("Tool results:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory::MemoryCategory;
    use crate::domain::task::{NewTask, Priority, TaskType};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn definition() -> AgentDefinition {
        AgentDefinition {
            id: "billing".to_string(),
            name: "Billing Clerk".to_string(),
            role: "Accounts receivable".to_string(),
            description: "Chases invoices".to_string(),
            capabilities: vec!["invoice".to_string(), "reminder".to_string()],
            model_preference: None,
            max_concurrent_tasks: 1,
        }
    }

    #[test]
    fn substitute_replaces_known_and_keeps_unknown() {
        let vars = HashMap::from([("a".to_string(), "1".to_string())]);

        assert_eq!(substitute("x{{a}}y{{ b }}z", &vars), "x1y{{ b }}z");
        assert_eq!(substitute("open {{a", &vars), "open {{a");
    }

    #[test]
    fn system_prompt_lists_identity_and_memories() {
        let memory = SemanticMemory {
            id: Uuid::new_v4(),
            category: MemoryCategory::Client,
            key: "ACME".to_string(),
            value: "Pays net 30".to_string(),
            confidence: 1.0,
            source: "test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let bare = system_prompt(&definition(), &[]);
        let enriched = system_prompt(&definition(), &[memory]);

        assert!(bare.starts_with(
            "You are Billing Clerk, a specialized AI agent.\nRole: Accounts receivable\n"
        ));
        assert!(bare.contains("Capabilities: invoice, reminder\n"));
        assert!(!bare.contains("Relevant memories"));
        assert!(enriched.ends_with("\n\nRelevant memories:\n- [client] ACME: Pays net 30"));
    }

    #[test]
    fn task_message_includes_optional_sections_only_when_present() {
        let mut input = serde_json::Map::new();
        input.insert("client".to_string(), json!("ACME"));
        let full = Task::new(
            NewTask::new("Invoice reminder", TaskType::Manual)
                .with_description("Overdue since May")
                .with_input(input)
                .with_priority(Priority::MOST_URGENT),
        )
        .unwrap();
        let bare = Task::new(NewTask::new("Ping", TaskType::Reactive)).unwrap();

        let full_message = task_message(&full);
        let bare_message = task_message(&bare);

        assert!(full_message
            .starts_with("Task: Invoice reminder\nDescription: Overdue since May\nInput:\n{"));
        assert!(full_message.ends_with("\nPriority: 1 (1=urgent, 5=background)\nType: manual\n"));
        assert_eq!(
            bare_message,
            "Task: Ping\n\nPriority: 3 (1=urgent, 5=background)\nType: reactive\n"
        );
    }

    #[test]
    fn tool_results_render_errors_and_values() {
        let results = vec![
            ToolResult::ok("call_1", json!({"stored": true})),
            ToolResult::error("call_2", "Unknown tool: fly"),
        ];

        assert_eq!(
            tool_results_message(&results),
            "Tool results:\ncall_1: {\"stored\":true}\ncall_2: ERROR: Unknown tool: fly"
        );
        assert_eq!(tools_placeholder(&["a", "b"]), "[Used tools: a, b]");
    }
}
