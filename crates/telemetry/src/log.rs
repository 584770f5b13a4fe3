//! A tracer that reports closed spans through the `tracing` crate.

use std::collections::BTreeMap;
use std::time::Instant;

use tandem_core::context::RunContext;
use tandem_core::trace::{Span, SpanContext, SpanKind, Tracer};
use tracing::{info, warn};
use uuid::Uuid;

/// Emits one `info!` event per closed span (`warn!` when it failed).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn start_span(&self, ctx: &RunContext, name: &str, kind: SpanKind) -> (Box<dyn Span>, RunContext) {
        let span_id = Uuid::new_v4().to_string();
        let trace_id = ctx
            .span()
            .map(|s| s.trace_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let context = SpanContext { trace_id, span_id };
        let child = ctx.with_span(Some(context.clone()));
        let span = LogSpan {
            name: name.to_string(),
            kind,
            context,
            started: Instant::now(),
            metrics: BTreeMap::new(),
            metadata: serde_json::Map::new(),
            error: None,
        };
        (Box::new(span), child)
    }
}

struct LogSpan {
    name: String,
    kind: SpanKind,
    context: SpanContext,
    started: Instant,
    metrics: BTreeMap<String, f64>,
    metadata: serde_json::Map<String, serde_json::Value>,
    error: Option<String>,
}

impl Span for LogSpan {
    fn context(&self) -> Option<&SpanContext> {
        Some(&self.context)
    }

    // Inputs and outputs can be large conversation payloads; only their
    // presence matters in logs.
    fn set_input(&mut self, _input: serde_json::Value) {}

    fn set_output(&mut self, _output: serde_json::Value) {}

    fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }

    fn set_metric(&mut self, key: &str, value: f64) {
        self.metrics.insert(key.to_string(), value);
    }

    fn set_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
    }

    fn close(self: Box<Self>) {
        let span = *self;
        let duration_ms = span.started.elapsed().as_millis() as u64;
        let metrics = format!("{:?}", span.metrics);
        let metadata = serde_json::Value::Object(span.metadata).to_string();
        match &span.error {
            Some(error) => warn!(
                span = %span.name,
                kind = %span.kind,
                trace_id = %span.context.trace_id,
                duration_ms,
                %metrics,
                %metadata,
                error = %error,
                "Span failed"
            ),
            None => info!(
                span = %span.name,
                kind = %span.kind,
                trace_id = %span.context.trace_id,
                duration_ms,
                %metrics,
                %metadata,
                "Span closed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_share_the_trace_id() {
        let (root, ctx) = LogTracer.start_span(&RunContext::new(), "run", SpanKind::Task);
        let (mut child, _) = LogTracer.start_span(&ctx, "lookup", SpanKind::Tool);
        child.set_metric("attempts", 1.0);

        let root_ctx = root.context().unwrap().clone();
        let child_ctx = child.context().unwrap().clone();
        assert_eq!(root_ctx.trace_id, child_ctx.trace_id);
        assert_ne!(root_ctx.span_id, child_ctx.span_id);

        child.close_with_error("boom");
        root.close();
    }
}
