//! Phasic core: a phase-gated agent execution engine.
//!
//! An [`Agent`] binds an immutable [`AgentSchema`] (tools, linked agents,
//! state fields, phase transitions) to a live [`StateContainer`], a
//! [`PhaseMachine`] and a model [`Provider`]. One invocation alternates
//! inferences with rounds of concurrent action dispatch until the model
//! answers with text only or the call depth runs out.
//!
//! Every state access flows through the field's [`Policy`] pipeline; which
//! actions are offered each round is decided by the current phase and by
//! per-descriptor conditions over a [`StateSnapshot`].

pub mod config;
pub mod descriptor;
mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod events;
pub mod message;
pub mod params;
pub mod phase;
pub mod policy;
pub mod provider;
pub mod response;
pub mod state;
pub mod testing;
pub mod tracer;

pub use config::AgentConfig;
pub use descriptor::{
    AgentHandle, AgentSchema, AgentSchemaBuilder, EligibleActions, LinkedAgentDescriptor,
    ToolDescriptor, ToolHandler,
};
pub use engine::{Agent, AgentBuilder};
pub use error::{AgentError, Result};
pub use event::{GetEvent, SetEvent};
pub use events::AgentEvent;
pub use message::{Message, MessageRole};
pub use params::{ParamKind, ParamSpec, ParamsSpec};
pub use phase::{PhaseMachine, Transition};
pub use policy::{AuditEntry, AuditPolicy, BoundsPolicy, Policy};
pub use provider::{InferenceRequest, Provider, ToolSpec};
pub use response::{
    ActionRequest, ActionResult, AgentResponse, Inference, ProviderInfo, ResponseAssembler,
    ToolResponse, Usage,
};
pub use state::{FieldAccess, StateContainer, StateField, StateSnapshot};
pub use tracer::{LogTracer, NoopTracer, Span, SpanKind, Tracer};
