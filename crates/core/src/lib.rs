//! # Tandem Core
//!
//! Domain types, traits, and error definitions for the Tandem agent
//! orchestration runtime. This crate has **no backend dependencies**: it
//! defines the conversation model and the seams (completer, toolset, memory,
//! tracer, streamer) that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the orchestration loop is a trait here.
//! Implementations live in their respective crates or in user code, so
//! vendor adapters, storage backends and telemetry sinks can be swapped
//! without touching the loop, and tests can inject scripted stand-ins.

pub mod completer;
pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod stream;
pub mod tool;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use completer::{
    ChatCompleter, CompletionRequest, CompletionResponse, FinishReason, ToolChoice, Usage,
};
pub use context::RunContext;
pub use error::{CompleterError, Error, MemoryError, Result, StreamError, ToolError};
pub use memory::{Memory, last_assistant, last_message, last_user};
pub use message::{
    AssistantMessage, Message, MessageBlock, ToolApprovalRequest, ToolCall, ToolCallApproval,
};
pub use stream::{ChannelStreamer, Chunk, ChunkAssembler, ChunkOrigin, Streamer};
pub use tool::{
    HandoffTarget, StaticToolset, Tool, ToolHandler, ToolKind, ToolOutput, Toolset, handler_fn,
    typed_handler,
};
pub use trace::{NoopTracer, Span, SpanContext, SpanKind, Tracer};
