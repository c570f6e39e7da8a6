// Agent execution loop
//
// One invocation alternates provider inferences with rounds of concurrent
// action dispatch until the model answers with text only or the configured
// call depth is exhausted, at which point one last inference runs with no
// actions offered. The eligible set and the state snapshot are taken once
// per round: the offer the model saw is exactly the set its requests are
// validated against.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::descriptor::{AgentHandle, AgentSchema};
use crate::dispatch::dispatch_round;
use crate::error::Result;
use crate::events::AgentEvent;
use crate::message::Message;
use crate::phase::PhaseMachine;
use crate::provider::{InferenceRequest, Provider};
use crate::response::{ActionResult, AgentResponse, Inference, ResponseAssembler};
use crate::state::{StateContainer, StateSnapshot};
use crate::tracer::{NoopTracer, Span, SpanKind, Tracer};

/// A runnable agent: schema plus live state, phase tracker, provider and
/// tracer. Conversation history persists across `run` calls, so an agent
/// instance is one ongoing conversation.
pub struct Agent {
    config: AgentConfig,
    schema: Arc<AgentSchema>,
    state: StateContainer,
    phases: Option<PhaseMachine>,
    provider: Arc<dyn Provider>,
    tracer: Arc<dyn Tracer>,
    // Held across a whole invocation, so concurrent runs on one instance
    // serialize instead of interleaving their turns.
    history: tokio::sync::Mutex<Vec<Message>>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            schema: AgentSchema::default(),
            provider: None,
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Run one invocation to completion and return the terminal response
    pub async fn run(&self, input: impl Into<String>) -> Result<AgentResponse> {
        self.run_inner(input.into(), None).await
    }

    /// Run one invocation, streaming events as they happen.
    ///
    /// The stream yields one event per inference, one per completed dispatch
    /// and exactly one `Final`; the join handle resolves to the same terminal
    /// response the `Final` event carries. Dropping the stream does not stop
    /// the run.
    pub fn run_stream(
        self: &Arc<Self>,
        input: impl Into<String>,
    ) -> (ReceiverStream<AgentEvent>, JoinHandle<Result<AgentResponse>>) {
        let (tx, rx) = mpsc::channel(64);
        let agent = Arc::clone(self);
        let input = input.into();
        let handle = tokio::spawn(async move { agent.run_inner(input, Some(tx)).await });
        (ReceiverStream::new(rx), handle)
    }

    /// Live state container, shared with tool handlers
    pub fn state(&self) -> &StateContainer {
        &self.state
    }

    /// Phase the agent currently sits in, if it declares phases
    pub fn current_phase(&self) -> Option<String> {
        self.phases.as_ref().map(|m| m.current())
    }

    /// Drop the conversation so the next `run` starts a fresh one
    pub async fn reset(&self) {
        self.history.lock().await.clear();
    }

    async fn run_inner(
        &self,
        input: String,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentResponse> {
        let span = Span::new(SpanKind::Agent, &self.config.name);
        self.tracer.span_start(&span);
        info!(agent = %self.config.name, "invocation start");

        let result = self.run_loop(input, &events).await;
        match &result {
            Ok(response) => {
                info!(agent = %self.config.name, rounds = response.rounds, "invocation done");
                self.tracer.span_end(&span, None);
                emit(&events, AgentEvent::finished(response.clone())).await;
            }
            Err(e) => {
                self.tracer.span_end(&span, Some(&e.to_string()));
            }
        }
        result
    }

    async fn run_loop(
        &self,
        input: String,
        events: &Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentResponse> {
        let mut history = self.history.lock().await;
        history.push(Message::user(input));

        let mut assembler = ResponseAssembler::new();
        let mut processed: HashSet<String> = HashSet::new();
        let mut depth: u32 = 0;

        loop {
            let phase = self.current_phase();
            let snapshot = self.state.snapshot().with_phase(phase.clone());
            let eligible = self.schema.eligible(phase.as_deref(), &snapshot);

            // Depth exhausted: one last inference with nothing offered.
            let offering = depth < self.config.max_call_depth;
            let tools = if offering {
                eligible.specs(&snapshot)
            } else {
                Vec::new()
            };

            let step_span = Span::new(SpanKind::Step, format!("{}[{depth}]", self.config.name));
            self.tracer.span_start(&step_span);

            let inference = match self.infer(&history, tools).await {
                Ok(mut inference) => {
                    for request in &mut inference.action_requests {
                        request.call_depth = depth;
                    }
                    inference
                }
                Err(e) => {
                    self.tracer.span_end(&step_span, Some(&e.to_string()));
                    return Err(e);
                }
            };
            assembler.record_inference(&inference);
            emit(
                events,
                AgentEvent::inference(depth, &inference.text, inference.action_requests.len()),
            )
            .await;

            if let Err(e) = self.advance_phase() {
                self.tracer.span_end(&step_span, Some(&e.to_string()));
                return Err(e);
            }

            if inference.is_final() || !offering {
                if !inference.action_requests.is_empty() {
                    warn!(
                        agent = %self.config.name,
                        requested = inference.action_requests.len(),
                        "action requests after depth exhaustion, ignoring"
                    );
                }
                history.push(Message::assistant(inference.text.clone()));
                self.tracer.span_end(&step_span, None);
                return Ok(assembler.finish(inference, self.current_phase()));
            }

            history.push(Message::tool_call(
                inference.text.clone(),
                inference.action_requests.clone(),
            ));

            let results = dispatch_round(
                &eligible,
                &inference.action_requests,
                &self.state,
                &snapshot,
                &mut processed,
                self.tracer.as_ref(),
            )
            .await;

            // Results land in the conversation in request order, so reruns
            // over the same script produce identical histories.
            for result in &results {
                history.push(Message::tool_result(
                    result.request_id(),
                    result.output_text(),
                ));
                let event = match result {
                    ActionResult::Tool(t) => AgentEvent::tool(t.clone()),
                    ActionResult::Agent { name, response, .. } => {
                        AgentEvent::agent(name.clone(), response.clone())
                    }
                };
                emit(events, event).await;
            }
            assembler.record_round(&results);

            if let Err(e) = self.advance_phase() {
                self.tracer.span_end(&step_span, Some(&e.to_string()));
                return Err(e);
            }
            self.tracer.span_end(&step_span, None);
            depth += 1;
        }
    }

    async fn infer(&self, history: &[Message], tools: Vec<crate::provider::ToolSpec>) -> Result<Inference> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        // System prompt is prepended fresh on every call, never stored.
        messages.push(Message::system(&self.config.system_prompt));
        messages.extend_from_slice(history);

        let span = Span::new(SpanKind::Inference, &self.config.name);
        self.tracer.span_start(&span);

        let request = InferenceRequest::new(messages, tools)
            .with_response_format(self.config.response_format.clone());
        match self.provider.infer(request).await {
            Ok(inference) => {
                self.tracer.span_end(&span, None);
                Ok(inference)
            }
            Err(e) => {
                self.tracer.span_end(&span, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    fn advance_phase(&self) -> Result<()> {
        let Some(machine) = &self.phases else {
            return Ok(());
        };
        let snapshot = self.state.snapshot().with_phase(Some(machine.current()));
        if let Some(to) = machine.advance(&snapshot)? {
            debug!(agent = %self.config.name, phase = %to, "entered phase");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("phase", &self.current_phase())
            .finish()
    }
}

#[async_trait]
impl AgentHandle for Agent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    async fn run_linked(&self, input: String) -> Result<AgentResponse> {
        self.run(input).await
    }
}

async fn emit(events: &Option<mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        // A dropped receiver stops delivery, not the run.
        let _ = tx.send(event).await;
    }
}

/// Assembles a runnable [`Agent`]
pub struct AgentBuilder {
    config: AgentConfig,
    schema: AgentSchema,
    provider: Option<Arc<dyn Provider>>,
    tracer: Arc<dyn Tracer>,
}

impl AgentBuilder {
    pub fn schema(mut self, schema: AgentSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Materialize state and the phase machine from the schema
    pub fn build(self) -> Result<Arc<Agent>> {
        let provider = self
            .provider
            .ok_or_else(|| crate::error::AgentError::config("agent requires a provider"))?;
        let state = StateContainer::from_fields(self.schema.fields());
        let phases = if self.schema.transitions().is_empty() {
            None
        } else {
            Some(PhaseMachine::new(self.schema.transitions().to_vec())?)
        };
        Ok(Arc::new(Agent {
            config: self.config,
            schema: Arc::new(self.schema),
            state,
            phases,
            provider,
            tracer: self.tracer,
            history: tokio::sync::Mutex::new(Vec::new()),
        }))
    }
}

// Snapshot helper used by tests and prompt builders.
impl Agent {
    /// Point-in-time view of visible state with the current phase attached
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot().with_phase(self.current_phase())
    }
}
