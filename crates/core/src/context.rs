//! Per-run context: cancellation plus the active tracing span.

use tokio_util::sync::CancellationToken;

use crate::trace::SpanContext;

/// Threaded through every completer call, tool handler and memory write of
/// a run. Cloning is cheap and clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    span: Option<SpanContext>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context driven by an externally owned token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self { token, span: None }
    }

    /// A context whose token is cancelled with this one, but can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            span: self.span.clone(),
        }
    }

    /// The same cancellation scope under a different span.
    pub fn with_span(&self, span: Option<SpanContext>) -> Self {
        Self {
            token: self.token.clone(),
            span,
        }
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent_cancellation() {
        let parent = RunContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_stays_local() {
        let parent = RunContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn span_is_carried_by_clones() {
        let span = SpanContext {
            trace_id: "t1".into(),
            span_id: "s1".into(),
        };
        let ctx = RunContext::new().with_span(Some(span.clone()));
        assert_eq!(ctx.child().span(), Some(&span));
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let ctx = RunContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        handle.await.unwrap();
    }
}
