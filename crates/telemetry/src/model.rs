//! Data model for recorded traces and spans.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_core::trace::SpanKind;
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Unique identifier.
    pub id: String,
    /// Parent span id (None for root spans).
    pub parent_id: Option<String>,
    /// Trace this span belongs to.
    pub trace_id: String,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (agent name, model name, tool name).
    pub name: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None if still running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SpanRecord {
    /// Create a root span in a fresh trace.
    pub fn new(kind: SpanKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            trace_id: Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input: None,
            output: None,
            error: None,
            metrics: BTreeMap::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Place the span under `parent_id` in an existing trace.
    pub fn with_parent(mut self, trace_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Mark the span as ended.
    pub fn end(&mut self) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All closed spans of one run, in closing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub spans: Vec<SpanRecord>,
    pub started_at: DateTime<Utc>,
    /// Set when the root span closes.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn add_span(&mut self, span: SpanRecord) {
        if span.is_root() {
            self.ended_at = span.ended_at;
        }
        self.spans.push(span);
    }

    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn root(&self) -> Option<&SpanRecord> {
        self.spans.iter().find(|s| s.is_root())
    }

    pub fn spans_of(&self, kind: SpanKind) -> impl Iterator<Item = &SpanRecord> {
        self.spans.iter().filter(move |s| s.kind == kind)
    }

    /// Number of model calls in this trace.
    pub fn llm_call_count(&self) -> usize {
        self.spans_of(SpanKind::Llm).count()
    }

    /// Number of tool executions in this trace.
    pub fn tool_call_count(&self) -> usize {
        self.spans_of(SpanKind::Tool).count()
    }

    /// Sum of a metric across all spans.
    pub fn metric_total(&self, key: &str) -> f64 {
        self.spans.iter().filter_map(|s| s.metrics.get(key)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_lifecycle() {
        let mut span = SpanRecord::new(SpanKind::Tool, "lookup");
        assert!(span.ended_at.is_none());
        assert!(span.is_root());
        span.end();
        assert!(span.ended_at.is_some());
        assert!(span.duration_ms.is_some());
        assert!(span.succeeded());
    }

    #[test]
    fn trace_completes_when_root_closes() {
        let mut root = SpanRecord::new(SpanKind::Task, "helper");
        let mut llm = SpanRecord::new(SpanKind::Llm, "gpt-4o").with_parent(&root.trace_id, &root.id);
        llm.metrics.insert("total_tokens".into(), 12.0);
        llm.end();

        let mut trace = Trace::new(root.trace_id.clone());
        trace.add_span(llm);
        assert!(!trace.is_complete());

        root.end();
        trace.add_span(root);
        assert!(trace.is_complete());
        assert_eq!(trace.llm_call_count(), 1);
        assert_eq!(trace.tool_call_count(), 0);
        assert_eq!(trace.metric_total("total_tokens"), 12.0);
        assert_eq!(trace.root().unwrap().name, "helper");
    }
}
