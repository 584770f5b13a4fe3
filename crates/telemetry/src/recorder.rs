//! Thread-safe span recorder: collects closed spans into traces.

use std::sync::{Arc, PoisonError, RwLock};

use tandem_core::context::RunContext;
use tandem_core::trace::{Span, SpanContext, SpanKind, Tracer};

use crate::model::{SpanRecord, Trace};

/// Retained traces before the oldest completed ones are pruned.
const DEFAULT_MAX_TRACES: usize = 1_000;

#[derive(Debug)]
struct Recorder {
    traces: RwLock<Vec<Trace>>,
    max_traces: usize,
}

impl Recorder {
    fn record(&self, span: SpanRecord) {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(trace) = traces.iter_mut().find(|t| t.id == span.trace_id) {
            trace.add_span(span);
            return;
        }

        if traces.len() >= self.max_traces {
            // Remove oldest completed traces first
            let drain_count = (self.max_traces / 10).max(1);
            let mut removed = 0;
            traces.retain(|t| {
                if removed >= drain_count || !t.is_complete() {
                    return true;
                }
                removed += 1;
                false
            });
        }

        let mut trace = Trace::new(span.trace_id.clone());
        trace.started_at = span.started_at;
        trace.add_span(span);
        traces.push(trace);
    }
}

/// A tracer that keeps every closed span in memory.
///
/// Clones share the same store, so a clone handed to an agent can be
/// inspected from the caller after the run.
#[derive(Debug, Clone)]
pub struct RecordingTracer {
    recorder: Arc<Recorder>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::with_max_traces(DEFAULT_MAX_TRACES)
    }

    pub fn with_max_traces(max_traces: usize) -> Self {
        Self {
            recorder: Arc::new(Recorder {
                traces: RwLock::new(Vec::new()),
                max_traces: max_traces.max(1),
            }),
        }
    }

    /// Snapshot of all retained traces, oldest first.
    pub fn traces(&self) -> Vec<Trace> {
        self.recorder
            .traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn trace(&self, id: &str) -> Option<Trace> {
        self.recorder
            .traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Every closed span across all traces.
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.traces().into_iter().flat_map(|t| t.spans).collect()
    }

    pub fn clear(&self) {
        self.recorder
            .traces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer for RecordingTracer {
    fn start_span(&self, ctx: &RunContext, name: &str, kind: SpanKind) -> (Box<dyn Span>, RunContext) {
        let mut record = SpanRecord::new(kind, name);
        if let Some(parent) = ctx.span() {
            record = record.with_parent(&parent.trace_id, &parent.span_id);
        }
        let context = SpanContext {
            trace_id: record.trace_id.clone(),
            span_id: record.id.clone(),
        };
        let child = ctx.with_span(Some(context.clone()));
        let span = RecordingSpan {
            record,
            context,
            recorder: Arc::clone(&self.recorder),
        };
        (Box::new(span), child)
    }
}

struct RecordingSpan {
    record: SpanRecord,
    context: SpanContext,
    recorder: Arc<Recorder>,
}

impl Span for RecordingSpan {
    fn context(&self) -> Option<&SpanContext> {
        Some(&self.context)
    }

    fn set_input(&mut self, input: serde_json::Value) {
        self.record.input = Some(input);
    }

    fn set_output(&mut self, output: serde_json::Value) {
        self.record.output = Some(output);
    }

    fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.record.metadata.insert(key.to_string(), value);
    }

    fn set_metric(&mut self, key: &str, value: f64) {
        self.record.metrics.insert(key.to_string(), value);
    }

    fn set_error(&mut self, error: &str) {
        self.record.error = Some(error.to_string());
    }

    fn close(self: Box<Self>) {
        let RecordingSpan {
            mut record,
            recorder,
            ..
        } = *self;
        record.end();
        recorder.record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_spans_join_the_parent_trace() {
        let tracer = RecordingTracer::new();
        let ctx = RunContext::new();

        let (mut root, run_ctx) = tracer.start_span(&ctx, "helper", SpanKind::Task);
        root.set_input(json!("2+2?"));
        let (mut llm, _) = tracer.start_span(&run_ctx, "gpt-4o", SpanKind::Llm);
        llm.set_metric("total_tokens", 9.0);
        llm.close();
        let (tool, _) = tracer.start_span(&run_ctx, "lookup", SpanKind::Tool);
        tool.close_with_error("not found");
        root.close_with_output(json!("4"));

        let traces = tracer.traces();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert!(trace.is_complete());
        assert_eq!(trace.spans.len(), 3);
        assert_eq!(trace.llm_call_count(), 1);

        let root = trace.root().unwrap();
        assert_eq!(root.output, Some(json!("4")));
        for span in trace.spans.iter().filter(|s| !s.is_root()) {
            assert_eq!(span.parent_id.as_deref(), Some(root.id.as_str()));
        }
        let tool = trace.spans_of(SpanKind::Tool).next().unwrap();
        assert_eq!(tool.error.as_deref(), Some("not found"));
    }

    #[test]
    fn span_context_is_propagated() {
        let tracer = RecordingTracer::new();
        let (span, ctx) = tracer.start_span(&RunContext::new(), "run", SpanKind::Task);
        assert_eq!(span.context(), ctx.span());
        span.close();
    }

    #[test]
    fn completed_traces_are_pruned() {
        let tracer = RecordingTracer::with_max_traces(10);
        for i in 0..25 {
            let (span, _) = tracer.start_span(&RunContext::new(), &format!("run-{i}"), SpanKind::Task);
            span.close();
        }
        let traces = tracer.traces();
        assert!(traces.len() <= 10);
        assert_eq!(traces.last().unwrap().root().unwrap().name, "run-24");
    }

    #[test]
    fn clones_share_storage() {
        let tracer = RecordingTracer::new();
        let clone = tracer.clone();
        let (span, _) = clone.start_span(&RunContext::new(), "run", SpanKind::Task);
        span.close();
        assert_eq!(tracer.spans().len(), 1);
        tracer.clear();
        assert!(clone.traces().is_empty());
    }
}
