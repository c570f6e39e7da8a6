// Tracing capability - fire-and-forget spans around loop stages
//
// Tracers are infallible by contract: an implementation that can fail must
// swallow or log its own errors. The engine never awaits or inspects tracer
// outcomes.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// What a span covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// One whole agent invocation (or a linked sub-agent's)
    Agent,
    /// One tool handler call
    Tool,
    /// One provider inference
    Inference,
    /// One loop round (inference plus its dispatch)
    Step,
}

/// One traced unit of work
#[derive(Debug, Clone)]
pub struct Span {
    pub id: Uuid,
    pub kind: SpanKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

impl Span {
    pub fn new(kind: SpanKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            name: name.into(),
            started_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Observer of span boundaries
pub trait Tracer: Send + Sync {
    fn span_start(&self, span: &Span);

    /// `error` carries the failure text when the spanned work failed
    fn span_end(&self, span: &Span, error: Option<&str>);
}

/// Tracer that does nothing; the default when none is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn span_start(&self, _span: &Span) {}
    fn span_end(&self, _span: &Span, _error: Option<&str>) {}
}

/// Tracer that logs span boundaries through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn span_start(&self, span: &Span) {
        tracing::debug!(span_id = %span.id, kind = ?span.kind, name = %span.name, "span start");
    }

    fn span_end(&self, span: &Span, error: Option<&str>) {
        match error {
            Some(error) => tracing::warn!(
                span_id = %span.id,
                kind = ?span.kind,
                name = %span.name,
                %error,
                "span end"
            ),
            None => tracing::debug!(
                span_id = %span.id,
                kind = ?span.kind,
                name = %span.name,
                "span end"
            ),
        }
    }
}
