// Model provider boundary
//
// The core is provider-agnostic: it hands the full conversation plus the
// point-in-time tool offer to whatever implements `Provider` and consumes a
// normalized `Inference`. Transport failures are fatal to the invocation;
// a provider that prefers to degrade may instead return fallback text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::response::{Inference, ProviderInfo};

/// One offered action, rendered against the current state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object for the action's parameters
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Everything the provider needs for one inference
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Full conversation, system message first
    pub messages: Vec<Message>,
    /// Actions offered this round; empty on the forced final inference
    pub tools: Vec<ToolSpec>,
    /// JSON schema the final answer should parse against, if configured
    pub response_format: Option<Value>,
}

impl InferenceRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self {
            messages,
            tools,
            response_format: None,
        }
    }

    pub fn with_response_format(mut self, response_format: Option<Value>) -> Self {
        self.response_format = response_format;
        self
    }
}

/// Inference backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run one inference over the given conversation and tool offer
    async fn infer(&self, request: InferenceRequest) -> Result<Inference>;

    /// Backend identity carried into responses
    fn info(&self) -> ProviderInfo;
}
