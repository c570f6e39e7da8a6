// Action descriptors and the agent schema
//
// A schema is the immutable declaration of everything one agent kind can do:
// its tools, linked agents, state fields and phase transitions. Schemas are
// assembled once through `AgentSchemaBuilder` and shared read-only by every
// running instance. Composition is explicit: `extend` merges another
// schema's tables with override-by-name.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{AgentError, Result};
use crate::params::{ParamSpec, ParamsSpec};
use crate::phase::Transition;
use crate::provider::ToolSpec;
use crate::response::AgentResponse;
use crate::state::{StateContainer, StateField, StateSnapshot};

type Condition = dyn Fn(&StateSnapshot) -> bool + Send + Sync;

/// Handler behind one tool descriptor.
///
/// Receives the validated, default-filled arguments and the live state
/// container. The returned string is fed back to the conversation; an error
/// becomes failure text, never a loop abort.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>, state: &StateContainer)
        -> anyhow::Result<String>;
}

/// A complete agent reachable as an action from a parent agent
#[async_trait]
pub trait AgentHandle: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the full loop of the linked agent over the forwarded input
    async fn run_linked(&self, input: String) -> Result<AgentResponse>;
}

// ============================================================================
// Descriptors
// ============================================================================

/// Declaration of one tool
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    params: ParamsSpec,
    /// Phases the tool is offered in; empty means every phase
    phases: Vec<String>,
    condition: Option<Arc<Condition>>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: ParamsSpec::empty(),
            phases: Vec::new(),
            condition: None,
            handler: Arc::new(handler),
        }
    }

    pub fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = ParamsSpec::new(params);
        self
    }

    /// Restrict the tool to the named phases
    pub fn phases(mut self, phases: &[&str]) -> Self {
        self.phases = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Additionally gate the tool on the current state snapshot
    pub fn condition(
        mut self,
        condition: impl Fn(&StateSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn params_spec(&self) -> &ParamsSpec {
        &self.params
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    fn is_eligible(&self, phase: Option<&str>, snapshot: &StateSnapshot) -> bool {
        eligible(&self.phases, &self.condition, phase, snapshot)
    }

    /// Offer rendered against the given snapshot (live choices resolved now)
    pub fn spec(&self, snapshot: &StateSnapshot) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.params.schema(snapshot))
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("phases", &self.phases)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

type AgentFactory = dyn Fn() -> Arc<dyn AgentHandle> + Send + Sync;

// How the linked agent is obtained: supplied up front, or built by a factory
// the first time the action is dispatched.
#[derive(Clone)]
enum AgentEntry {
    Ready(Arc<dyn AgentHandle>),
    Deferred {
        factory: Arc<AgentFactory>,
        // Shared across descriptor clones so construction happens at most once
        cell: Arc<OnceLock<Arc<dyn AgentHandle>>>,
    },
}

impl AgentEntry {
    fn resolve(&self) -> Arc<dyn AgentHandle> {
        match self {
            AgentEntry::Ready(handle) => Arc::clone(handle),
            AgentEntry::Deferred { factory, cell } => Arc::clone(cell.get_or_init(|| factory())),
        }
    }

    fn is_deferred(&self) -> bool {
        matches!(self, AgentEntry::Deferred { .. })
    }
}

/// Declaration of one linked agent, offered to the model as an action that
/// returns the sub-agent's final text. The call signature defaults to a
/// single free-text `input` field.
#[derive(Clone)]
pub struct LinkedAgentDescriptor {
    name: String,
    description: String,
    params: ParamsSpec,
    phases: Vec<String>,
    condition: Option<Arc<Condition>>,
    entry: AgentEntry,
}

impl LinkedAgentDescriptor {
    /// Link an agent under its own name and description
    pub fn new(entry: Arc<dyn AgentHandle>) -> Self {
        Self {
            name: entry.name().to_string(),
            description: entry.description().to_string(),
            params: Self::input_params(),
            phases: Vec::new(),
            condition: None,
            entry: AgentEntry::Ready(entry),
        }
    }

    /// Link an agent built on first dispatch instead of up front. The
    /// factory runs at most once; until then no sub-agent exists.
    pub fn deferred(
        name: impl Into<String>,
        description: impl Into<String>,
        factory: impl Fn() -> Arc<dyn AgentHandle> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Self::input_params(),
            phases: Vec::new(),
            condition: None,
            entry: AgentEntry::Deferred {
                factory: Arc::new(factory),
                cell: Arc::new(OnceLock::new()),
            },
        }
    }

    /// Replace the default single-`input` call signature
    pub fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = ParamsSpec::new(params);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn phases(mut self, phases: &[&str]) -> Self {
        self.phases = phases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn condition(
        mut self,
        condition: impl Fn(&StateSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sub-agent behind this action, building it now if deferred
    pub(crate) fn handle(&self) -> Arc<dyn AgentHandle> {
        self.entry.resolve()
    }

    fn is_eligible(&self, phase: Option<&str>, snapshot: &StateSnapshot) -> bool {
        eligible(&self.phases, &self.condition, phase, snapshot)
    }

    fn input_params() -> ParamsSpec {
        ParamsSpec::new(vec![
            ParamSpec::string("input").description("The request to forward to this agent")
        ])
    }

    /// Decode the forwarded input out of the raw arguments.
    ///
    /// With the default signature this is the `input` string itself; a
    /// custom signature forwards the resolved argument object as JSON text.
    pub(crate) fn decode_input(&self, args: &Value, snapshot: &StateSnapshot) -> Result<String> {
        let resolved = self.params.resolve_args(args, snapshot)?;
        if resolved.len() == 1 {
            if let Some(Value::String(input)) = resolved.get("input") {
                return Ok(input.clone());
            }
        }
        Ok(Value::Object(resolved).to_string())
    }

    pub fn spec(&self, snapshot: &StateSnapshot) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.params.schema(snapshot))
    }
}

impl fmt::Debug for LinkedAgentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedAgentDescriptor")
            .field("name", &self.name)
            .field("phases", &self.phases)
            .field("deferred", &self.entry.is_deferred())
            .finish()
    }
}

// No phase machine (phase = None) means every descriptor is phase-eligible.
fn eligible(
    phases: &[String],
    condition: &Option<Arc<Condition>>,
    phase: Option<&str>,
    snapshot: &StateSnapshot,
) -> bool {
    let phase_ok = match (phases.is_empty(), phase) {
        (true, _) | (false, None) => true,
        (false, Some(current)) => phases.iter().any(|p| p == current),
    };
    phase_ok && condition.as_ref().map_or(true, |c| c(snapshot))
}

// ============================================================================
// Schema
// ============================================================================

/// Immutable declaration tables for one agent kind
#[derive(Debug, Clone, Default)]
pub struct AgentSchema {
    tools: Vec<ToolDescriptor>,
    agents: Vec<LinkedAgentDescriptor>,
    fields: Vec<StateField>,
    transitions: Vec<Transition>,
}

impl AgentSchema {
    pub fn builder() -> AgentSchemaBuilder {
        AgentSchemaBuilder::default()
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Descriptors eligible right now, in declaration order (tools first)
    pub fn eligible(&self, phase: Option<&str>, snapshot: &StateSnapshot) -> EligibleActions<'_> {
        EligibleActions {
            tools: self
                .tools
                .iter()
                .filter(|t| t.is_eligible(phase, snapshot))
                .collect(),
            agents: self
                .agents
                .iter()
                .filter(|a| a.is_eligible(phase, snapshot))
                .collect(),
        }
    }
}

/// Point-in-time eligible set for one round
pub struct EligibleActions<'a> {
    tools: Vec<&'a ToolDescriptor>,
    agents: Vec<&'a LinkedAgentDescriptor>,
}

impl<'a> EligibleActions<'a> {
    /// Offers rendered against the given snapshot
    pub fn specs(&self, snapshot: &StateSnapshot) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| t.spec(snapshot))
            .chain(self.agents.iter().map(|a| a.spec(snapshot)))
            .collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<&'a ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name).copied()
    }

    pub fn find_agent(&self, name: &str) -> Option<&'a LinkedAgentDescriptor> {
        self.agents.iter().find(|a| a.name == name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.agents.is_empty()
    }
}

/// Assembles an [`AgentSchema`], validating name uniqueness at build time
#[derive(Default)]
pub struct AgentSchemaBuilder {
    tools: Vec<ToolDescriptor>,
    agents: Vec<LinkedAgentDescriptor>,
    fields: Vec<StateField>,
    transitions: Vec<Transition>,
}

impl AgentSchemaBuilder {
    pub fn tool(mut self, tool: ToolDescriptor) -> Self {
        override_or_push(&mut self.tools, tool, |t| t.name.clone());
        self
    }

    pub fn agent(mut self, agent: LinkedAgentDescriptor) -> Self {
        override_or_push(&mut self.agents, agent, |a| a.name.clone());
        self
    }

    pub fn field(mut self, field: StateField) -> Self {
        override_or_push(&mut self.fields, field, |f| f.name().to_string());
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Merge another schema's tables into this builder. Same-named entries
    /// from `other` replace existing ones in place; new entries append.
    /// Transitions from `other` are appended after the ones declared so far.
    pub fn extend(mut self, other: &AgentSchema) -> Self {
        for tool in &other.tools {
            override_or_push(&mut self.tools, tool.clone(), |t| t.name.clone());
        }
        for agent in &other.agents {
            override_or_push(&mut self.agents, agent.clone(), |a| a.name.clone());
        }
        for field in &other.fields {
            override_or_push(&mut self.fields, field.clone(), |f| f.name().to_string());
        }
        self.transitions.extend(other.transitions.iter().cloned());
        self
    }

    pub fn build(self) -> Result<AgentSchema> {
        let mut action_names: Vec<&str> = self
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.agents.iter().map(|a| a.name.as_str()))
            .collect();
        action_names.sort_unstable();
        for pair in action_names.windows(2) {
            if pair[0] == pair[1] {
                return Err(AgentError::config(format!(
                    "duplicate action name `{}`",
                    pair[0]
                )));
            }
        }
        Ok(AgentSchema {
            tools: self.tools,
            agents: self.agents,
            fields: self.fields,
            transitions: self.transitions,
        })
    }
}

// Override-by-name keeps the original declaration position.
fn override_or_push<T>(table: &mut Vec<T>, entry: T, name: impl Fn(&T) -> String) {
    let entry_name = name(&entry);
    match table.iter().position(|e| name(e) == entry_name) {
        Some(index) => table[index] = entry,
        None => table.push(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubAgent {
        name: &'static str,
    }

    #[async_trait]
    impl AgentHandle for StubAgent {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        async fn run_linked(&self, _input: String) -> Result<AgentResponse> {
            unreachable!()
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(
            &self,
            args: Map<String, Value>,
            _state: &StateContainer,
        ) -> anyhow::Result<String> {
            Ok(args
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        }
    }

    fn snapshot() -> StateSnapshot {
        StateContainer::from_fields(&[StateField::new("approved", false)]).snapshot()
    }

    fn phase_snapshot(phase: &str) -> StateSnapshot {
        snapshot().with_phase(Some(phase.to_string()))
    }

    #[test]
    fn test_phase_eligibility() {
        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("edit", "Edit the draft", EchoTool).phases(&["draft"]))
            .tool(ToolDescriptor::new("approve", "Approve it", EchoTool).phases(&["review"]))
            .tool(ToolDescriptor::new("note", "Always available", EchoTool))
            .build()
            .unwrap();

        let eligible = schema.eligible(Some("draft"), &phase_snapshot("draft"));
        assert!(eligible.find_tool("edit").is_some());
        assert!(eligible.find_tool("approve").is_none());
        assert!(eligible.find_tool("note").is_some());
    }

    #[test]
    fn test_no_phase_machine_means_all_eligible() {
        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("edit", "Edit the draft", EchoTool).phases(&["draft"]))
            .build()
            .unwrap();

        assert!(schema.eligible(None, &snapshot()).find_tool("edit").is_some());
    }

    #[test]
    fn test_condition_gates_on_state() {
        let schema = AgentSchema::builder()
            .tool(
                ToolDescriptor::new("publish", "Publish it", EchoTool)
                    .condition(|snap| snap.bool_of("approved") == Some(true)),
            )
            .build()
            .unwrap();

        assert!(schema.eligible(None, &snapshot()).find_tool("publish").is_none());

        let approved =
            StateContainer::from_fields(&[StateField::new("approved", true)]).snapshot();
        assert!(schema
            .eligible(None, &approved)
            .find_tool("publish")
            .is_some());
    }

    #[test]
    fn test_extend_overrides_by_name() {
        let base = AgentSchema::builder()
            .tool(ToolDescriptor::new("search", "Base search", EchoTool))
            .field(StateField::new("count", 0))
            .build()
            .unwrap();

        let schema = AgentSchema::builder()
            .tool(ToolDescriptor::new("search", "Overridden search", EchoTool))
            .extend(&base)
            .build()
            .unwrap();

        let eligible = schema.eligible(None, &snapshot());
        let specs = eligible.specs(&snapshot());
        assert_eq!(specs.len(), 1);
        // The later declaration (from the extended schema) wins
        assert_eq!(specs[0].description, "Base search");
        assert_eq!(schema.fields().len(), 1);
    }

    #[test]
    fn test_phase_restriction_wins_over_condition() {
        // An always-true condition must not widen the phase set.
        let schema = AgentSchema::builder()
            .tool(
                ToolDescriptor::new("edit", "Edit the draft", EchoTool)
                    .phases(&["draft"])
                    .condition(|_| true),
            )
            .build()
            .unwrap();

        assert!(schema
            .eligible(Some("review"), &phase_snapshot("review"))
            .find_tool("edit")
            .is_none());
        assert!(schema
            .eligible(Some("draft"), &phase_snapshot("draft"))
            .find_tool("edit")
            .is_some());
    }

    #[test]
    fn test_duplicate_action_names_rejected() {
        let result = AgentSchema::builder()
            .tool(ToolDescriptor::new("search", "A tool", EchoTool))
            .agent(LinkedAgentDescriptor::new(Arc::new(StubAgent {
                name: "search",
            })))
            .build();

        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_linked_agent_input_decoding() {
        let descriptor = LinkedAgentDescriptor::new(Arc::new(StubAgent { name: "lookup" }));

        let input = descriptor
            .decode_input(&json!({"input": "look this up"}), &snapshot())
            .unwrap();
        assert_eq!(input, "look this up");

        assert!(descriptor.decode_input(&json!({}), &snapshot()).is_err());
    }

    #[test]
    fn test_linked_agent_custom_signature_forwards_json() {
        let descriptor = LinkedAgentDescriptor::new(Arc::new(StubAgent { name: "lookup" }))
            .params(vec![
                ParamSpec::string("query"),
                ParamSpec::integer("limit").default_value(5),
            ]);

        let input = descriptor
            .decode_input(&json!({"query": "rust"}), &snapshot())
            .unwrap();
        let forwarded: Value = serde_json::from_str(&input).unwrap();
        assert_eq!(forwarded["query"], json!("rust"));
        assert_eq!(forwarded["limit"], json!(5));
    }

    #[test]
    fn test_deferred_agent_built_once_on_first_use() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let descriptor = LinkedAgentDescriptor::deferred("lookup", "Built on demand", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(StubAgent { name: "lookup" })
        });

        // Declaring (and cloning) the descriptor constructs nothing.
        let clone = descriptor.clone();
        assert_eq!(built.load(Ordering::SeqCst), 0);

        assert_eq!(descriptor.handle().name(), "lookup");
        assert_eq!(clone.handle().name(), "lookup");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
