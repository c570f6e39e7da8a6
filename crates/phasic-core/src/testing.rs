// In-memory test doubles: a scripted provider, a recording tracer and a
// couple of canned tool handlers. Used by the crate's own tests and handy
// for downstream integration tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::descriptor::ToolHandler;
use crate::error::{AgentError, Result};
use crate::provider::{InferenceRequest, Provider};
use crate::response::{Inference, ProviderInfo};
use crate::state::StateContainer;
use crate::tracer::{Span, SpanKind, Tracer};

/// Provider that replays a scripted sequence of inferences and records every
/// request it receives. Running past the end of the script is a provider
/// error, so a test that loops more than scripted fails loudly.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Inference>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one inference to the script
    pub fn script(self, inference: Inference) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(inference);
        self
    }

    /// Every request received so far, in call order
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<Inference> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| AgentError::provider("mock script exhausted"))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new("mock", "scripted")
    }
}

/// One observed span boundary
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub kind: SpanKind,
    pub name: String,
    /// `None` for a start record or a clean end
    pub error: Option<String>,
    pub ended: bool,
}

/// Tracer that records every span boundary for later assertions
#[derive(Default)]
pub struct RecordingTracer {
    records: Mutex<Vec<SpanRecord>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SpanRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Completed spans of the given kind
    pub fn ended_of(&self, kind: SpanKind) -> Vec<SpanRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.ended && r.kind == kind)
            .collect()
    }
}

impl Tracer for RecordingTracer {
    fn span_start(&self, span: &Span) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SpanRecord {
                kind: span.kind,
                name: span.name.clone(),
                error: None,
                ended: false,
            });
    }

    fn span_end(&self, span: &Span, error: Option<&str>) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SpanRecord {
                kind: span.kind,
                name: span.name.clone(),
                error: error.map(str::to_string),
                ended: true,
            });
    }
}

/// Tool that always returns the same output
pub struct StaticTool {
    output: String,
}

impl StaticTool {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for StaticTool {
    async fn call(
        &self,
        _args: Map<String, Value>,
        _state: &StateContainer,
    ) -> anyhow::Result<String> {
        Ok(self.output.clone())
    }
}

/// Tool that always fails with the same message
pub struct FailingTool {
    message: String,
}

impl FailingTool {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(
        &self,
        _args: Map<String, Value>,
        _state: &StateContainer,
    ) -> anyhow::Result<String> {
        anyhow::bail!("{}", self.message)
    }
}
