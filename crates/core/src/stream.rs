//! Streaming protocol.
//!
//! A completer invoked with a [`Streamer`] emits typed [`Chunk`]s while it
//! generates. The agent loop adds `ToolCallExecute` / `ToolCallComplete`
//! around each tool invocation; those carry [`ChunkOrigin::Agent`].
//!
//! Chunks are ordered per block index only. When tool calls run
//! concurrently their chunks interleave, so consumers assemble by index
//! (see [`ChunkAssembler`]) and never by arrival order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::completer::{CompletionResponse, FinishReason, Usage};
use crate::error::StreamError;
use crate::message::{MessageBlock, ToolCall};

/// One unit of an incremental response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    /// Text delta
    Text { index: usize, text: String },

    /// A tool call block opens
    ToolCallStart { index: usize, id: String, name: String },

    /// Incremental JSON argument text for the tool call at `index`
    ToolCallDelta { index: usize, arguments: String },

    /// The agent is about to run a tool (`index` is the call's block index
    /// in the assistant reply, matching the model's `ToolCallStart`)
    ToolCallExecute {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },

    /// The agent finished running a tool (`index` as in `ToolCallExecute`)
    ToolCallComplete {
        index: usize,
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Reasoning text delta
    Reasoning { index: usize, text: String },

    /// Reasoning signature delta
    Signature { index: usize, signature: String },

    /// A backend-executed tool call opens
    ServerToolCallStart { index: usize, id: String, name: String },

    /// Argument delta for a backend-executed tool call
    ServerToolCallDelta { index: usize, arguments: String },

    /// The backend's inline result for a server tool call
    ToolResult {
        index: usize,
        call_id: String,
        result: serde_json::Value,
    },

    /// Usage counters so far
    Usage { usage: Usage },

    /// Terminal chunk
    Finish { reason: FinishReason },
}

/// Who produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrigin {
    /// The model backend
    Model,
    /// The orchestration layer
    Agent,
}

impl Chunk {
    pub fn origin(&self) -> ChunkOrigin {
        match self {
            Self::ToolCallExecute { .. } | Self::ToolCallComplete { .. } => ChunkOrigin::Agent,
            _ => ChunkOrigin::Model,
        }
    }

    /// Block index the chunk belongs to, for block-scoped chunks.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Text { index, .. }
            | Self::ToolCallStart { index, .. }
            | Self::ToolCallDelta { index, .. }
            | Self::ToolCallExecute { index, .. }
            | Self::ToolCallComplete { index, .. }
            | Self::Reasoning { index, .. }
            | Self::Signature { index, .. }
            | Self::ServerToolCallStart { index, .. }
            | Self::ServerToolCallDelta { index, .. }
            | Self::ToolResult { index, .. } => Some(*index),
            Self::Usage { .. } | Self::Finish { .. } => None,
        }
    }
}

/// Sink for streamed chunks.
#[async_trait]
pub trait Streamer: Send + Sync {
    async fn send(&self, chunk: Chunk) -> std::result::Result<(), StreamError>;
}

/// Forwards chunks into a bounded `mpsc` channel.
#[derive(Debug, Clone)]
pub struct ChannelStreamer {
    tx: mpsc::Sender<Chunk>,
}

impl ChannelStreamer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Chunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Streamer for ChannelStreamer {
    async fn send(&self, chunk: Chunk) -> std::result::Result<(), StreamError> {
        self.tx.send(chunk).await.map_err(|_| StreamError::Closed)
    }
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolCall(ToolCall),
    Reasoning { text: String, signature: String },
    ServerToolCall(ToolCall),
    ToolResult { call_id: String, result: serde_json::Value },
}

impl From<PartialBlock> for MessageBlock {
    fn from(block: PartialBlock) -> Self {
        match block {
            PartialBlock::Text(text) => MessageBlock::Text { text },
            PartialBlock::ToolCall(call) => MessageBlock::ToolCall(call),
            PartialBlock::Reasoning { text, signature } => MessageBlock::Reasoning { text, signature },
            PartialBlock::ServerToolCall(call) => MessageBlock::ServerToolCall(call),
            PartialBlock::ToolResult { call_id, result } => {
                MessageBlock::ToolResultInline { call_id, result }
            }
        }
    }
}

/// Rebuilds a [`CompletionResponse`] from model chunks, keyed by block index.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    blocks: BTreeMap<usize, PartialBlock>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in. Chunks from the orchestration layer are ignored.
    pub fn push(&mut self, chunk: &Chunk) {
        match chunk {
            Chunk::Text { index, text } => match self.blocks.get_mut(index) {
                Some(PartialBlock::Text(existing)) => existing.push_str(text),
                _ => {
                    self.blocks.insert(*index, PartialBlock::Text(text.clone()));
                }
            },
            Chunk::ToolCallStart { index, id, name } => {
                self.blocks.insert(
                    *index,
                    PartialBlock::ToolCall(ToolCall::new(id.clone(), name.clone(), "")),
                );
            }
            Chunk::ServerToolCallStart { index, id, name } => {
                self.blocks.insert(
                    *index,
                    PartialBlock::ServerToolCall(ToolCall::new(id.clone(), name.clone(), "")),
                );
            }
            Chunk::ToolCallDelta { index, arguments }
            | Chunk::ServerToolCallDelta { index, arguments } => {
                if let Some(PartialBlock::ToolCall(call) | PartialBlock::ServerToolCall(call)) =
                    self.blocks.get_mut(index)
                {
                    call.arguments.push_str(arguments);
                }
            }
            Chunk::Reasoning { index, text: delta } => match self.blocks.get_mut(index) {
                Some(PartialBlock::Reasoning { text, .. }) => text.push_str(delta),
                _ => {
                    self.blocks.insert(
                        *index,
                        PartialBlock::Reasoning {
                            text: delta.clone(),
                            signature: String::new(),
                        },
                    );
                }
            },
            Chunk::Signature { index, signature: delta } => match self.blocks.get_mut(index) {
                Some(PartialBlock::Reasoning { signature, .. }) => signature.push_str(delta),
                _ => {
                    self.blocks.insert(
                        *index,
                        PartialBlock::Reasoning {
                            text: String::new(),
                            signature: delta.clone(),
                        },
                    );
                }
            },
            Chunk::ToolResult {
                index,
                call_id,
                result,
            } => {
                self.blocks.insert(
                    *index,
                    PartialBlock::ToolResult {
                        call_id: call_id.clone(),
                        result: result.clone(),
                    },
                );
            }
            Chunk::Usage { usage } => self.usage = *usage,
            Chunk::Finish { reason } => self.finish_reason = Some(*reason),
            Chunk::ToolCallExecute { .. } | Chunk::ToolCallComplete { .. } => {}
        }
    }

    /// The assembled response. Without a finish chunk, the reason is
    /// inferred from whether any tool call was streamed.
    pub fn finish(self, model: impl Into<String>) -> CompletionResponse {
        let content: Vec<MessageBlock> = self.blocks.into_values().map(Into::into).collect();
        let finish_reason = self.finish_reason.unwrap_or_else(|| {
            if content.iter().any(|b| matches!(b, MessageBlock::ToolCall(_))) {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            }
        });
        CompletionResponse {
            content,
            finish_reason,
            usage: self.usage,
            model: model.into(),
        }
    }
}
