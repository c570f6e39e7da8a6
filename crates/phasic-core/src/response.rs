// Provider inference results, action outcomes and the final agent response

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another inference's usage into this total
    pub fn absorb(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Identity of the backend that produced an inference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
        }
    }
}

/// One action the model asked for in an inference response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Provider-assigned id, echoed back in the matching result message
    pub id: String,
    /// Name of the requested action
    pub name: String,
    /// Raw argument object as produced by the model
    pub arguments: Value,
    /// Round the request belongs to; stamped by the engine, providers
    /// should leave it at zero
    pub call_depth: u32,
}

impl ActionRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            call_depth: 0,
        }
    }
}

/// One normalized inference result from the provider
#[derive(Debug, Clone, Default)]
pub struct Inference {
    /// Assistant text; may be empty when the model only requests actions
    pub text: String,
    /// Structured output decoded against the configured response format
    pub parsed: Option<Value>,
    pub action_requests: Vec<ActionRequest>,
    pub usage: Usage,
    pub info: ProviderInfo,
}

impl Inference {
    /// Text-only inference, ending the loop
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Inference requesting one or more actions
    pub fn requests(action_requests: Vec<ActionRequest>) -> Self {
        Self {
            action_requests,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_parsed(mut self, parsed: Value) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// An inference with no action requests terminates the loop
    pub fn is_final(&self) -> bool {
        self.action_requests.is_empty()
    }
}

/// Outcome of dispatching one tool request.
///
/// Dispatch never aborts the loop: failures become failure text the model
/// sees on the next round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub request_id: String,
    pub name: String,
    /// Text fed back to the conversation
    pub output: String,
    /// Argument object exactly as the model produced it
    pub raw_kwargs: Value,
    /// Arguments after default-filling and validation; `Null` when decoding
    /// failed
    pub parameters: Value,
    pub call_depth: u32,
    pub success: bool,
}

impl ToolResponse {
    pub fn ok(request: &ActionRequest, parameters: Value, output: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            name: request.name.clone(),
            output: output.into(),
            raw_kwargs: request.arguments.clone(),
            parameters,
            call_depth: request.call_depth,
            success: true,
        }
    }

    /// Failure result, phrased for the model to read
    pub fn failure(request: &ActionRequest, error: impl std::fmt::Display) -> Self {
        Self {
            request_id: request.id.clone(),
            name: request.name.clone(),
            output: format!("Tool `{}` failed: {error}", request.name),
            raw_kwargs: request.arguments.clone(),
            parameters: Value::Null,
            call_depth: request.call_depth,
            success: false,
        }
    }
}

/// Final answer produced by one agent invocation.
///
/// Nested invocations of linked agents appear in `agent_responses`, so a
/// deep run yields a response tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: Uuid,
    /// Final text; empty if the model returned none
    pub final_output: String,
    /// Structured output from the final inference, if any
    pub parsed: Option<Value>,
    /// Phase the agent finished in, if it declares phases
    pub phase: Option<String>,
    /// Rounds of dispatch that ran before the final answer
    pub rounds: u32,
    /// Every tool outcome of the invocation, in dispatch order
    pub tool_responses: Vec<ToolResponse>,
    /// Final responses of linked agents invoked along the way
    pub agent_responses: Vec<AgentResponse>,
    /// Usage summed across every inference of the invocation
    pub usage: Usage,
    pub provider_info: ProviderInfo,
    pub created_at: DateTime<Utc>,
}

/// Result of dispatching one action request: either a tool outcome or a
/// completed linked-agent invocation. Linked-agent failures are reported as
/// failed `Tool` results so the conversation always gets text back.
#[derive(Debug, Clone)]
pub enum ActionResult {
    Tool(ToolResponse),
    Agent {
        request_id: String,
        name: String,
        response: AgentResponse,
    },
}

impl ActionResult {
    pub fn request_id(&self) -> &str {
        match self {
            ActionResult::Tool(t) => &t.request_id,
            ActionResult::Agent { request_id, .. } => request_id,
        }
    }

    /// Text appended to the conversation for this result
    pub fn output_text(&self) -> &str {
        match self {
            ActionResult::Tool(t) => &t.output,
            ActionResult::Agent { response, .. } => &response.final_output,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            ActionResult::Tool(t) => t.success,
            ActionResult::Agent { .. } => true,
        }
    }
}

/// Accumulates per-round results and yields the terminal response
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    tool_responses: Vec<ToolResponse>,
    agent_responses: Vec<AgentResponse>,
    usage: Usage,
    provider_info: ProviderInfo,
    rounds: u32,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one inference's usage and provenance
    pub fn record_inference(&mut self, inference: &Inference) {
        self.usage.absorb(&inference.usage);
        self.provider_info = inference.info.clone();
    }

    /// Record one dispatch round's results, already in request order
    pub fn record_round(&mut self, results: &[ActionResult]) {
        self.rounds += 1;
        for result in results {
            match result {
                ActionResult::Tool(t) => self.tool_responses.push(t.clone()),
                ActionResult::Agent { response, .. } => {
                    self.agent_responses.push(response.clone())
                }
            }
        }
    }

    /// Close out the invocation with the final inference
    pub fn finish(self, final_inference: Inference, phase: Option<String>) -> AgentResponse {
        AgentResponse {
            id: Uuid::now_v7(),
            final_output: final_inference.text,
            parsed: final_inference.parsed,
            phase,
            rounds: self.rounds,
            tool_responses: self.tool_responses,
            agent_responses: self.agent_responses,
            usage: self.usage,
            provider_info: self.provider_info,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_inference_is_final() {
        assert!(Inference::text("done").is_final());
        assert!(
            !Inference::requests(vec![ActionRequest::new("1", "search", json!({}))]).is_final()
        );
    }

    #[test]
    fn test_failure_phrasing() {
        let request = ActionRequest::new("call-1", "search", json!({"q": "x"}));
        let response = ToolResponse::failure(&request, "no such index");

        assert_eq!(response.output, "Tool `search` failed: no such index");
        assert_eq!(response.raw_kwargs, json!({"q": "x"}));
        assert!(!response.success);
    }

    #[test]
    fn test_usage_absorb() {
        let mut total = Usage::default();
        total.absorb(&Usage::new(10, 5));
        total.absorb(&Usage::new(3, 2));

        assert_eq!(total.prompt_tokens, 13);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 20);
    }

    #[test]
    fn test_assembler_accumulates_rounds() {
        let mut assembler = ResponseAssembler::new();
        assembler.record_inference(
            &Inference::requests(vec![]).with_usage(Usage::new(10, 2)),
        );

        let request = ActionRequest::new("1", "echo", json!({}));
        assembler.record_round(&[ActionResult::Tool(ToolResponse::ok(
            &request,
            json!({}),
            "hi",
        ))]);
        assembler.record_inference(&Inference::text("done").with_usage(Usage::new(4, 1)));

        let response = assembler.finish(Inference::text("done"), Some("done".into()));
        assert_eq!(response.rounds, 1);
        assert_eq!(response.tool_responses.len(), 1);
        assert_eq!(response.usage.total_tokens, 17);
        assert_eq!(response.phase.as_deref(), Some("done"));
    }
}
