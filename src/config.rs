//! Application configuration.
//!
//! Process settings come from the environment (optionally via `.env`);
//! agent definitions and model settings come from JSON files in the config
//! directory, falling back to built-in defaults when a file is missing or
//! unreadable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agents::AgentDefinition;
use crate::llm::Pricing;

/// Completion service vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    OpenRouter,
    Ollama,
}

/// Settings for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    pub provider: Provider,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub cost_per_input_token: f64,
    #[serde(default)]
    pub cost_per_output_token: f64,
    /// Overrides the provider's default endpoint
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn pricing(&self) -> Pricing {
        Pricing {
            per_input_token: self.cost_per_input_token,
            per_output_token: self.cost_per_output_token,
        }
    }
}

/// Model catalogue with the primary and fallback choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub primary: String,
    pub fallback: String,
    pub models: HashMap<String, ModelConfig>,
}

impl ModelsConfig {
    /// Candidate models for an agent, most preferred first: its own
    /// preference, then primary, then fallback. Unknown ids are skipped.
    pub fn candidates_for(&self, preference: Option<&str>) -> Vec<&ModelConfig> {
        let mut ids: Vec<&str> = Vec::with_capacity(3);
        for id in preference.into_iter().chain([self.primary.as_str(), self.fallback.as_str()]) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.into_iter().filter_map(|id| self.models.get(id)).collect()
    }
}

/// Agents and models loaded from the config directory
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub agents: Vec<AgentDefinition>,
    pub models: ModelsConfig,
}

impl AppConfig {
    /// Load `agents.json` and `models.json` from `dir`
    pub fn load(dir: &Path) -> Self {
        Self {
            agents: load_json(&dir.join("agents.json"), default_agents),
            models: load_json(&dir.join("models.json"), default_models),
        }
    }
}

fn load_json<T: DeserializeOwned>(path: &Path, fallback: fn() -> T) -> T {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return fallback();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Error reading config file, using defaults",
            );
            fallback()
        }
    }
}

/// Process settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub config_dir: PathBuf,
    pub poll_interval: Duration,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(Self::DEFAULT_PORT);

        let poll_ms = std::env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(Self::DEFAULT_POLL_INTERVAL_MS);

        Self {
            port,
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            config_dir: std::env::var("CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config")),
            poll_interval: Duration::from_millis(poll_ms),
        }
    }
}

pub fn default_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            id: "coordinator".to_string(),
            name: "Coordinator".to_string(),
            role: "Task Router & Coordinator".to_string(),
            description: "Routes tasks to specialized agents, manages priorities, \
                          and oversees workflow"
                .to_string(),
            capabilities: vec![
                "routing".to_string(),
                "planning".to_string(),
                "coordination".to_string(),
                "prioritization".to_string(),
            ],
            model_preference: None,
            max_concurrent_tasks: 1,
        },
        AgentDefinition {
            id: "general".to_string(),
            name: "General Assistant".to_string(),
            role: "General Purpose Agent".to_string(),
            description: "Handles miscellaneous tasks, research, and analysis".to_string(),
            capabilities: vec![
                "research".to_string(),
                "analysis".to_string(),
                "writing".to_string(),
                "summarization".to_string(),
                "general".to_string(),
            ],
            model_preference: None,
            max_concurrent_tasks: 1,
        },
    ]
}

pub fn default_models() -> ModelsConfig {
    let sonnet = ModelConfig {
        id: "claude-sonnet".to_string(),
        provider: Provider::Anthropic,
        model: "claude-sonnet-4-20250514".to_string(),
        api_key_env: "ANTHROPIC_API_KEY".to_string(),
        max_tokens: 4096,
        temperature: 0.7,
        cost_per_input_token: 0.000003,
        cost_per_output_token: 0.000015,
        base_url: None,
    };
    let haiku = ModelConfig {
        id: "claude-haiku".to_string(),
        model: "claude-3-5-haiku-20241022".to_string(),
        cost_per_input_token: 0.0000008,
        cost_per_output_token: 0.000004,
        ..sonnet.clone()
    };

    ModelsConfig {
        primary: sonnet.id.clone(),
        fallback: haiku.id.clone(),
        models: HashMap::from([(sonnet.id.clone(), sonnet), (haiku.id.clone(), haiku)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_falls_back_to_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/agentdesk/config"));

        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].id, "coordinator");
        assert_eq!(config.models.primary, "claude-sonnet");
    }

    #[test]
    fn model_config_parses_camel_case() {
        let model: ModelConfig = serde_json::from_value(serde_json::json!({
            "id": "local",
            "provider": "ollama",
            "model": "llama3",
            "apiKeyEnv": "UNUSED",
            "maxTokens": 2048,
            "temperature": 0.1,
            "baseUrl": "http://gpu-box:11434/v1/chat/completions"
        }))
        .unwrap();

        assert_eq!(model.provider, Provider::Ollama);
        assert_eq!(model.cost_per_input_token, 0.0);
        assert!(model.base_url.is_some());
    }

    #[test]
    fn candidates_prefer_agent_choice_then_primary_then_fallback() {
        let models = default_models();

        let preferred: Vec<&str> = models
            .candidates_for(Some("claude-haiku"))
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        let default: Vec<&str> =
            models.candidates_for(None).iter().map(|m| m.id.as_str()).collect();
        let unknown = models.candidates_for(Some("gpt-9"));

        assert_eq!(preferred, vec!["claude-haiku", "claude-sonnet"]);
        assert_eq!(default, vec!["claude-sonnet", "claude-haiku"]);
        assert_eq!(unknown.len(), 2);
    }
}
