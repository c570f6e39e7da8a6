// Action dispatch - one round of concurrent tool and linked-agent calls
//
// All requests of a round fan out together and the round completes only when
// every one has resolved (fan-in barrier). Results are returned in request
// order regardless of completion order. Dispatch never aborts the loop:
// unknown names, argument decode failures, rejected state writes and handler
// errors all become failure text the model reads on the next round.

use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::descriptor::{EligibleActions, LinkedAgentDescriptor, ToolDescriptor};
use crate::response::{ActionRequest, ActionResult, ToolResponse};
use crate::state::{StateContainer, StateSnapshot};
use crate::tracer::{Span, SpanKind, Tracer};

/// Dispatch every request of one round against the round's eligible set.
///
/// `processed` carries request ids already handled earlier in the invocation;
/// duplicates are skipped without producing a result.
pub(crate) async fn dispatch_round(
    eligible: &EligibleActions<'_>,
    requests: &[ActionRequest],
    state: &StateContainer,
    snapshot: &StateSnapshot,
    processed: &mut HashSet<String>,
    tracer: &dyn Tracer,
) -> Vec<ActionResult> {
    let mut fresh = Vec::with_capacity(requests.len());
    for request in requests {
        if processed.insert(request.id.clone()) {
            fresh.push(request);
        } else {
            debug!(request_id = %request.id, name = %request.name, "duplicate request id, skipping");
        }
    }

    join_all(
        fresh
            .into_iter()
            .map(|request| dispatch_one(eligible, request, state, snapshot, tracer)),
    )
    .await
}

async fn dispatch_one(
    eligible: &EligibleActions<'_>,
    request: &ActionRequest,
    state: &StateContainer,
    snapshot: &StateSnapshot,
    tracer: &dyn Tracer,
) -> ActionResult {
    if let Some(tool) = eligible.find_tool(&request.name) {
        return call_tool(tool, request, state, snapshot, tracer).await;
    }
    if let Some(agent) = eligible.find_agent(&request.name) {
        return call_agent(agent, request, snapshot, tracer).await;
    }
    warn!(name = %request.name, "requested action is not eligible");
    ActionResult::Tool(ToolResponse::failure(
        request,
        format!("unknown action: {}", request.name),
    ))
}

async fn call_tool(
    tool: &ToolDescriptor,
    request: &ActionRequest,
    state: &StateContainer,
    snapshot: &StateSnapshot,
    tracer: &dyn Tracer,
) -> ActionResult {
    // Choices and defaults resolve against the snapshot taken for this round.
    let args = match tool.params_spec().resolve_args(&request.arguments, snapshot) {
        Ok(args) => args,
        Err(e) => {
            warn!(name = %request.name, error = %e, "argument decoding failed");
            return ActionResult::Tool(ToolResponse::failure(request, e));
        }
    };

    let span = Span::new(SpanKind::Tool, &request.name)
        .attribute("request_id", &request.id);
    tracer.span_start(&span);

    let parameters = serde_json::Value::Object(args.clone());
    let result = tool.handler().call(args, state).await;
    match result {
        Ok(output) => {
            tracer.span_end(&span, None);
            ActionResult::Tool(ToolResponse::ok(request, parameters, output))
        }
        Err(e) => {
            warn!(name = %request.name, error = %e, "tool handler failed");
            tracer.span_end(&span, Some(&e.to_string()));
            ActionResult::Tool(ToolResponse::failure(request, e))
        }
    }
}

async fn call_agent(
    agent: &LinkedAgentDescriptor,
    request: &ActionRequest,
    snapshot: &StateSnapshot,
    tracer: &dyn Tracer,
) -> ActionResult {
    let input = match agent.decode_input(&request.arguments, snapshot) {
        Ok(input) => input,
        Err(e) => {
            warn!(name = %request.name, error = %e, "argument decoding failed");
            return ActionResult::Tool(ToolResponse::failure(request, e));
        }
    };

    let span = Span::new(SpanKind::Agent, request.name.clone())
        .attribute("request_id", &request.id);
    tracer.span_start(&span);

    match agent.handle().run_linked(input).await {
        Ok(response) => {
            tracer.span_end(&span, None);
            ActionResult::Agent {
                request_id: request.id.clone(),
                name: request.name.clone(),
                response,
            }
        }
        Err(e) => {
            warn!(name = %request.name, error = %e, "linked agent failed");
            tracer.span_end(&span, Some(&e.to_string()));
            ActionResult::Tool(ToolResponse::failure(request, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AgentSchema, ToolHandler};
    use crate::state::StateField;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    struct SleepyEcho {
        delay_ms: u64,
    }

    #[async_trait]
    impl ToolHandler for SleepyEcho {
        async fn call(
            &self,
            args: Map<String, Value>,
            _state: &StateContainer,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(
            &self,
            _args: Map<String, Value>,
            _state: &StateContainer,
        ) -> anyhow::Result<String> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn echo_params() -> Vec<crate::params::ParamSpec> {
        vec![crate::params::ParamSpec::string("text")]
    }

    async fn run(
        schema: &AgentSchema,
        requests: Vec<ActionRequest>,
    ) -> Vec<ActionResult> {
        let state = StateContainer::from_fields(&[StateField::new("count", 0)]);
        let snapshot = state.snapshot();
        let eligible = schema.eligible(None, &snapshot);
        let mut processed = HashSet::new();
        dispatch_round(
            &eligible,
            &requests,
            &state,
            &snapshot,
            &mut processed,
            &crate::tracer::NoopTracer,
        )
        .await
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let schema = AgentSchema::builder()
            .tool(
                ToolDescriptor::new("slow", "", SleepyEcho { delay_ms: 40 }).params(echo_params()),
            )
            .tool(
                ToolDescriptor::new("fast", "", SleepyEcho { delay_ms: 1 }).params(echo_params()),
            )
            .build()
            .unwrap();

        let results = run(
            &schema,
            vec![
                ActionRequest::new("1", "slow", json!({"text": "first"})),
                ActionRequest::new("2", "fast", json!({"text": "second"})),
            ],
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output_text(), "first");
        assert_eq!(results[1].output_text(), "second");
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("broken", "", Failing))
            .build()
            .unwrap();

        let results = run(
            &schema,
            vec![
                ActionRequest::new("1", "broken", json!({})),
                ActionRequest::new("2", "missing", json!({})),
            ],
        )
        .await;

        assert!(!results[0].success());
        assert_eq!(
            results[0].output_text(),
            "Tool `broken` failed: backend unavailable"
        );
        assert!(results[1].output_text().contains("unknown action"));
    }

    #[tokio::test]
    async fn test_duplicate_ids_skipped() {
        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("echo", "", SleepyEcho { delay_ms: 0 }).params(echo_params()))
            .build()
            .unwrap();

        let results = run(
            &schema,
            vec![
                ActionRequest::new("1", "echo", json!({"text": "a"})),
                ActionRequest::new("1", "echo", json!({"text": "b"})),
            ],
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output_text(), "a");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_poison_siblings() {
        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("broken", "", Failing))
            .tool(ToolDescriptor::new("echo", "", SleepyEcho { delay_ms: 0 }).params(echo_params()))
            .build()
            .unwrap();

        let results = run(
            &schema,
            vec![
                ActionRequest::new("1", "broken", json!({})),
                ActionRequest::new("2", "echo", json!({"text": "fine"})),
            ],
        )
        .await;

        assert!(!results[0].success());
        assert!(results[1].success());
        assert_eq!(results[1].output_text(), "fine");
    }
}
