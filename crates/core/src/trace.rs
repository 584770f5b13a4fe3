//! Tracing boundary: span hooks the agent loop calls around each run,
//! each model call and each tool call.
//!
//! The loop only depends on these traits. [`NoopTracer`] is the default and
//! does nothing; real sinks live in `tandem-telemetry` or user code.

use serde::{Deserialize, Serialize};

use crate::context::RunContext;

/// What a span measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A model completion
    Llm,
    /// A scoring pass
    Score,
    /// Generic function execution
    Function,
    /// An evaluation
    Eval,
    /// A whole agent run
    Task,
    /// A tool invocation
    Tool,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Llm => "llm",
            Self::Score => "score",
            Self::Function => "function",
            Self::Eval => "eval",
            Self::Task => "task",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Identity of the active span, propagated through [`RunContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

/// An open span. Closing consumes it.
pub trait Span: Send {
    /// The identity of this span, if the tracer assigns one.
    fn context(&self) -> Option<&SpanContext>;

    fn set_input(&mut self, input: serde_json::Value);
    fn set_output(&mut self, output: serde_json::Value);
    fn set_metadata(&mut self, key: &str, value: serde_json::Value);
    fn set_metric(&mut self, key: &str, value: f64);
    fn set_error(&mut self, error: &str);

    fn close(self: Box<Self>);

    fn close_with_error(mut self: Box<Self>, error: &str) {
        self.set_error(error);
        self.close();
    }

    fn close_with_output(mut self: Box<Self>, output: serde_json::Value) {
        self.set_output(output);
        self.close();
    }
}

/// Starts spans. The returned context carries the new span so children
/// started from it are parented correctly.
pub trait Tracer: Send + Sync {
    fn start_span(&self, ctx: &RunContext, name: &str, kind: SpanKind) -> (Box<dyn Span>, RunContext);
}

/// A tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, ctx: &RunContext, _name: &str, _kind: SpanKind) -> (Box<dyn Span>, RunContext) {
        (Box::new(NoopSpan), ctx.clone())
    }
}

struct NoopSpan;

impl Span for NoopSpan {
    fn context(&self) -> Option<&SpanContext> {
        None
    }
    fn set_input(&mut self, _input: serde_json::Value) {}
    fn set_output(&mut self, _output: serde_json::Value) {}
    fn set_metadata(&mut self, _key: &str, _value: serde_json::Value) {}
    fn set_metric(&mut self, _key: &str, _value: f64) {}
    fn set_error(&mut self, _error: &str) {}
    fn close(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_keeps_context() {
        let ctx = RunContext::new();
        let (mut span, child) = NoopTracer.start_span(&ctx, "run", SpanKind::Task);
        span.set_metric("tokens", 3.0);
        span.set_metadata("agent", serde_json::json!("helper"));
        assert!(span.context().is_none());
        assert!(child.span().is_none());
        span.close_with_error("boom");
    }

    #[test]
    fn span_kind_names() {
        assert_eq!(SpanKind::Llm.to_string(), "llm");
        assert_eq!(serde_json::to_string(&SpanKind::Tool).unwrap(), r#""tool""#);
    }
}
