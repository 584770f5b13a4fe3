//! Shared test helpers for agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tandem_core::completer::{ChatCompleter, CompletionRequest, CompletionResponse, FinishReason};
use tandem_core::context::RunContext;
use tandem_core::error::CompleterError;
use tandem_core::message::{MessageBlock, ToolCall};

/// A completer that returns a sequence of scripted responses and records
/// every request it receives.
///
/// Each call to `complete` returns the next response in the queue. Running
/// out of responses is an `InvalidResponse` error so over-calling shows up
/// as a failed run instead of a hang.
#[derive(Default)]
pub struct ScriptedCompleter {
    responses: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatCompleter for ScriptedCompleter {
    async fn complete(
        &self,
        _ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompleterError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CompleterError::InvalidResponse("no more scripted responses".into()))
    }
}

/// A reply asking for the given `(id, name, arguments)` calls.
pub fn tool_calls(calls: &[(&str, &str, &str)]) -> CompletionResponse {
    CompletionResponse {
        content: calls
            .iter()
            .map(|(id, name, args)| MessageBlock::ToolCall(ToolCall::new(*id, *name, *args)))
            .collect(),
        finish_reason: FinishReason::ToolCalls,
        ..Default::default()
    }
}
