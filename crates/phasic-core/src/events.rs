// Streaming events emitted during an agent invocation
//
// Incremental consumers see one event per inference, one per completed
// dispatch, and exactly one Final carrying the terminal response. Events
// are emitted in strict chronological order; dropping the receiver only
// stops delivery, never the run.

use chrono::{DateTime, Utc};

use crate::response::{AgentResponse, ToolResponse};

/// One observable step of a running invocation
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A provider inference completed
    Inference {
        /// Round the inference belongs to
        depth: u32,
        /// Assistant text, possibly empty
        text: String,
        /// How many actions the model requested
        requested: usize,
        timestamp: DateTime<Utc>,
    },
    /// A tool dispatch completed (successfully or as failure text)
    Tool {
        response: ToolResponse,
        timestamp: DateTime<Utc>,
    },
    /// A linked agent's invocation completed
    Agent {
        name: String,
        response: AgentResponse,
        timestamp: DateTime<Utc>,
    },
    /// The invocation's terminal response; always the last event
    Final {
        response: AgentResponse,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn inference(depth: u32, text: impl Into<String>, requested: usize) -> Self {
        AgentEvent::Inference {
            depth,
            text: text.into(),
            requested,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(response: ToolResponse) -> Self {
        AgentEvent::Tool {
            response,
            timestamp: Utc::now(),
        }
    }

    pub fn agent(name: impl Into<String>, response: AgentResponse) -> Self {
        AgentEvent::Agent {
            name: name.into(),
            response,
            timestamp: Utc::now(),
        }
    }

    pub fn finished(response: AgentResponse) -> Self {
        AgentEvent::Final {
            response,
            timestamp: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, AgentEvent::Final { .. })
    }
}
