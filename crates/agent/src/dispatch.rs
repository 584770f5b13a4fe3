//! Concurrent tool execution for one batch of approved calls.
//!
//! Calls run on a `JoinSet` bounded by a semaphore. Results are collected
//! by slot and returned in call order regardless of completion order.
//! A handoff cancels the batch token: calls still waiting for a permit do
//! not start, calls already running finish on the run's own token.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tandem_core::context::RunContext;
use tandem_core::error::ToolError;
use tandem_core::message::ToolCall;
use tandem_core::stream::{Chunk, Streamer};
use tandem_core::tool::{HandoffTarget, ToolOutput, Toolset};
use tandem_core::trace::{SpanKind, Tracer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// What happened to one call of the batch.
#[derive(Clone)]
pub(crate) enum Outcome {
    Value(serde_json::Value),
    Error(String),
    Handoff {
        target: Arc<dyn HandoffTarget>,
        message: Option<String>,
    },
    /// Never started because the batch was handed off or cancelled
    NotStarted,
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Handoff { target, .. } => f.debug_tuple("Handoff").field(&target.name()).finish(),
            Self::NotStarted => f.write_str("NotStarted"),
        }
    }
}

/// Everything a tool task needs, shared across the batch.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) toolset: Arc<dyn Toolset>,
    pub(crate) tracer: Arc<dyn Tracer>,
    pub(crate) streamer: Option<Arc<dyn Streamer>>,
    /// 1 is sequential, 0 or less is unbounded
    pub(crate) parallelism: i64,
}

impl Dispatcher {
    /// Run `calls` (each paired with its block position) and return one
    /// outcome per call, in input order.
    pub(crate) async fn dispatch(&self, ctx: &RunContext, calls: Vec<(usize, ToolCall)>) -> Vec<Outcome> {
        let total = calls.len();
        // A bound at or above the batch size never makes a call wait
        let limit = usize::try_from(self.parallelism)
            .ok()
            .filter(|&n| n > 0 && n < total)
            .map(|n| Arc::new(Semaphore::new(n)));
        let batch = ctx.child();
        let mut join_set = JoinSet::new();

        for (slot, (index, call)) in calls.into_iter().enumerate() {
            let dispatcher = self.clone();
            let limit = limit.clone();
            let batch = batch.clone();
            let run_ctx = ctx.clone();

            join_set.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => tokio::select! {
                        biased;
                        _ = batch.cancelled() => return (slot, Outcome::NotStarted),
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (slot, Outcome::NotStarted),
                        },
                    },
                    None => None,
                };
                if batch.is_cancelled() {
                    return (slot, Outcome::NotStarted);
                }

                let outcome = dispatcher.run_one(&run_ctx, index, &call).await;
                if matches!(outcome, Outcome::Handoff { .. }) {
                    debug!(tool = %call.name, call_id = %call.id, "Handoff requested, aborting pending calls");
                    batch.cancel();
                }
                (slot, outcome)
            });
        }

        let mut results: Vec<(usize, Outcome)> = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => error!(error = %join_err, "Tool task failed to complete"),
            }
        }

        // Sort by original slot to preserve call order
        results.sort_by_key(|(slot, _)| *slot);
        let mut outcomes = Vec::with_capacity(total);
        let mut results = results.into_iter().peekable();
        for slot in 0..total {
            match results.next_if(|(s, _)| *s == slot) {
                Some((_, outcome)) => outcomes.push(outcome),
                None => outcomes.push(Outcome::Error("tool task did not complete".into())),
            }
        }
        outcomes
    }

    async fn run_one(&self, ctx: &RunContext, index: usize, call: &ToolCall) -> Outcome {
        let arguments = call.normalized_arguments();
        let (mut span, call_ctx) = self.tracer.start_span(ctx, &call.name, SpanKind::Tool);
        span.set_input(json!({ "id": call.id, "arguments": arguments }));

        self.emit(Chunk::ToolCallExecute {
            index,
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.to_string(),
        })
        .await;

        let result = tokio::select! {
            biased;
            _ = call_ctx.cancelled() => Err(ToolError::Cancelled),
            caught = AssertUnwindSafe(self.toolset.call(&call_ctx, &call.name, arguments)).catch_unwind() => {
                match caught {
                    Ok(result) => result,
                    Err(panic) => Err(ToolError::Panicked(call.name.clone(), panic_message(panic.as_ref()))),
                }
            }
        };

        let outcome = match result {
            Ok(ToolOutput::Value(value)) => {
                span.close_with_output(value.clone());
                Outcome::Value(value)
            }
            Ok(ToolOutput::Handoff { target, message }) => {
                span.set_metadata("handoff", json!(target.name()));
                span.close();
                Outcome::Handoff { target, message }
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                span.close_with_error(&e.to_string());
                Outcome::Error(e.to_string())
            }
        };

        let (result, error) = match &outcome {
            Outcome::Value(v) => (Some(v.clone()), None),
            Outcome::Error(e) => (None, Some(e.clone())),
            Outcome::Handoff { target, .. } => (Some(json!({ "handoff": target.name() })), None),
            Outcome::NotStarted => (None, None),
        };
        self.emit(Chunk::ToolCallComplete {
            index,
            id: call.id.clone(),
            name: call.name.clone(),
            result,
            error,
        })
        .await;

        outcome
    }

    async fn emit(&self, chunk: Chunk) {
        if let Some(streamer) = &self.streamer
            && let Err(e) = streamer.send(chunk).await
        {
            debug!(error = %e, "Dropping tool chunk");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
