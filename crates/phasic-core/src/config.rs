// Agent configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static configuration for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, used in logs, spans and linked-agent tool names
    pub name: String,
    /// One-line description, offered to parent agents when linked
    #[serde(default)]
    pub description: String,
    /// System prompt prepended to every inference
    pub system_prompt: String,
    /// Rounds of tool dispatch allowed before the final toolless inference
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: u32,
    /// JSON schema the final answer should parse against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

fn default_max_call_depth() -> u32 {
    1
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            max_call_depth: default_max_call_depth(),
            response_format: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: u32) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_response_format(mut self, response_format: Value) -> Self {
        self.response_format = Some(response_format);
        self
    }
}
