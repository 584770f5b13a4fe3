//! ChatCompleter trait: the abstraction over model backends.
//!
//! A completer turns a message history into the next model turn, either as
//! one complete response or (when the request carries a streamer) by also
//! emitting incremental [`Chunk`](crate::stream::Chunk)s while it works.
//!
//! Vendor adapters (OpenAI-style, Anthropic-style, local runtimes) implement
//! this trait and do nothing else: they hold no orchestration logic.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::CompleterError;
use crate::message::{AssistantMessage, Message, MessageBlock};
use crate::stream::Streamer;
use crate::tool::Tool;

/// How the model may use the advertised tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cached_prompt_tokens: u32,
}

impl Usage {
    /// Accumulate another usage report into this one, saturating at `u32::MAX`.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cached_prompt_tokens = self.cached_prompt_tokens.saturating_add(other.cached_prompt_tokens);
    }
}

/// The provider-agnostic request envelope.
#[derive(Clone, Default)]
pub struct CompletionRequest {
    /// Backend model id (after alias mapping)
    pub model: String,

    /// Starter messages followed by the memory history
    pub messages: Vec<Message>,

    /// Tools the model may call
    pub tools: Vec<Tool>,

    /// Tool-choice policy; `None` lets the backend decide
    pub tool_choice: Option<ToolChoice>,

    /// Whether the model may emit several tool calls per turn
    pub parallel_tool_calls: bool,

    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,

    /// When set, the completer also emits incremental chunks here
    pub streamer: Option<Arc<dyn Streamer>>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer.is_some()
    }
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("tool_choice", &self.tool_choice)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("top_k", &self.top_k)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

/// A complete response from a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Ordered content blocks of the model turn
    pub content: Vec<MessageBlock>,

    pub finish_reason: FinishReason,

    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl CompletionResponse {
    /// A plain text reply that finished normally.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![MessageBlock::Text { text: text.into() }],
            finish_reason: FinishReason::Stop,
            ..Default::default()
        }
    }

    /// The reply as an assistant message, blocks kept in order.
    pub fn into_message(self) -> AssistantMessage {
        AssistantMessage::new(self.content)
    }
}

/// The core ChatCompleter trait.
///
/// The agent loop calls `complete()` without knowing which backend answers.
/// Implementations should observe `ctx.cancelled()`; the loop also races
/// the call against cancellation and drops the in-flight response.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, CompleterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn finish_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            r#""tool_calls""#
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::ContentFilter).unwrap(),
            r#""content_filter""#
        );
        assert_eq!(serde_json::to_string(&ToolChoice::Required).unwrap(), r#""required""#);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cached_prompt_tokens: 2,
        });
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            cached_prompt_tokens: 0,
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.cached_prompt_tokens, 2);

        total.add(&Usage {
            total_tokens: u32::MAX,
            ..Usage::default()
        });
        assert_eq!(total.total_tokens, u32::MAX);
    }

    #[test]
    fn response_converts_to_message_in_order() {
        let response = CompletionResponse {
            content: vec![
                MessageBlock::Text { text: "checking".into() },
                MessageBlock::ToolCall(ToolCall::new("c1", "lookup", "{}")),
            ],
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        };
        let msg = response.into_message();
        assert_eq!(msg.text(), "checking");
        assert_eq!(msg.tool_calls()[0].id, "c1");
    }

    #[test]
    fn request_debug_hides_message_bodies() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("secret")]);
        let debug = format!("{request:?}");
        assert!(debug.contains("gpt-4o"));
        assert!(!debug.contains("secret"));
        assert!(!request.is_streaming());
    }
}
