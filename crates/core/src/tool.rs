//! Toolset: the registry of capabilities the model may call.
//!
//! A [`Tool`] is the descriptor sent to the model; a [`ToolHandler`] is the
//! code that runs when the model calls it. A [`Toolset`] pairs the two by
//! name and is shared by every concurrent tool task of a run, so it
//! synchronizes internally.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RunContext;
use crate::error::{Result, ToolError};
use crate::memory::Memory;
use crate::message::AssistantMessage;

/// Who executes a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Runs in this process through a [`ToolHandler`]
    #[default]
    Function,
    /// Runs inside the backend (web search, code execution); the model's
    /// calls come back as server tool call blocks and are never dispatched
    Builtin,
}

impl ToolKind {
    fn is_function(&self) -> bool {
        *self == Self::Function
    }
}

/// A tool descriptor, sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique within a toolset
    pub name: String,

    #[serde(default, skip_serializing_if = "ToolKind::is_function")]
    pub kind: ToolKind,

    /// What the tool does (sent to the model)
    pub description: String,

    /// JSON Schema of the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    /// JSON Schema of the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ToolKind::Function,
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    /// A backend-executed tool, advertised to the model without a handler.
    pub fn builtin(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: ToolKind::Builtin,
            ..Self::new(name, description)
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Something that can take over a conversation mid-run.
///
/// Agents implement this; a handler returning [`ToolOutput::Handoff`]
/// transfers control to the target with the run's memory.
#[async_trait]
pub trait HandoffTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn take_over(&self, ctx: &RunContext, memory: Arc<dyn Memory>) -> Result<AssistantMessage>;
}

/// What a successful tool handler produced.
pub enum ToolOutput {
    /// A result to record for the call
    Value(serde_json::Value),

    /// Stop tool execution and hand the conversation to `target`.
    /// `message` is appended as an assistant note before the target runs.
    Handoff {
        target: Arc<dyn HandoffTarget>,
        message: Option<String>,
    },
}

impl ToolOutput {
    /// Serialize any value into a result.
    pub fn value<T: Serialize>(value: T) -> std::result::Result<Self, ToolError> {
        serde_json::to_value(value)
            .map(Self::Value)
            .map_err(|e| ToolError::failed(format!("failed to serialize tool result: {e}")))
    }

    pub fn handoff(target: Arc<dyn HandoffTarget>, message: Option<String>) -> Self {
        Self::Handoff { target, message }
    }

    pub fn is_handoff(&self) -> bool {
        matches!(self, Self::Handoff { .. })
    }
}

impl From<serde_json::Value> for ToolOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Handoff { target, message } => f
                .debug_struct("Handoff")
                .field("target", &target.name())
                .field("message", message)
                .finish(),
        }
    }
}

/// Executes one tool call. `arguments` is raw JSON text.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &RunContext, arguments: &str) -> std::result::Result<ToolOutput, ToolError>;
}

/// A name-indexed registry of tools.
#[async_trait]
pub trait Toolset: Send + Sync {
    /// Descriptors in registration order.
    fn list(&self) -> Vec<Tool>;

    async fn call(
        &self,
        ctx: &RunContext,
        name: &str,
        arguments: &str,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Register a tool. Replaces any existing tool with the same name.
    fn register(&self, tool: Tool, handler: Arc<dyn ToolHandler>);
}

/// The default in-process toolset.
///
/// With a fallback, lookups that miss here go to the fallback, and listing
/// shows local tools first followed by unshadowed fallback tools. That makes
/// a cheap per-run overlay over a shared toolset.
#[derive(Default)]
pub struct StaticToolset {
    entries: RwLock<Vec<(Tool, Arc<dyn ToolHandler>)>>,
    fallback: Option<Arc<dyn Toolset>>,
}

impl StaticToolset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Toolset>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_tool(self, tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(tool, handler);
        self
    }

    /// Number of locally registered tools.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(tool, _)| tool.name == name)
            .map(|(_, handler)| Arc::clone(handler))
    }
}

#[async_trait]
impl Toolset for StaticToolset {
    fn list(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tool, _)| tool.clone())
            .collect();
        if let Some(fallback) = &self.fallback {
            for tool in fallback.list() {
                if !tools.iter().any(|t| t.name == tool.name) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    async fn call(
        &self,
        ctx: &RunContext,
        name: &str,
        arguments: &str,
    ) -> std::result::Result<ToolOutput, ToolError> {
        // The lock guard must not live across the await.
        let handler = self.handler(name);
        match (handler, &self.fallback) {
            (Some(handler), _) => handler.call(ctx, arguments).await,
            (None, Some(fallback)) => fallback.call(ctx, name, arguments).await,
            (None, None) => {
                debug!(tool = %name, "No handler registered");
                Err(ToolError::NotFound(name.to_string()))
            }
        }
    }

    fn register(&self, tool: Tool, handler: Arc<dyn ToolHandler>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(t, _)| t.name == tool.name) {
            Some(entry) => {
                debug!(tool = %tool.name, "Replacing registered tool");
                *entry = (tool, handler);
            }
            None => entries.push((tool, handler)),
        }
    }
}

struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F, Fut>
where
    F: Fn(RunContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolOutput, ToolError>> + Send + 'static,
{
    async fn call(&self, ctx: &RunContext, arguments: &str) -> std::result::Result<ToolOutput, ToolError> {
        (self.f)(ctx.clone(), arguments.to_string()).await
    }
}

/// Adapt an async closure over raw JSON arguments into a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(RunContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolOutput, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}

struct TypedHandler<I, O, F, Fut> {
    f: F,
    _marker: PhantomData<fn(I) -> (O, Fut)>,
}

#[async_trait]
impl<I, O, F, Fut> ToolHandler for TypedHandler<I, O, F, Fut>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(RunContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<O, ToolError>> + Send + 'static,
{
    async fn call(&self, ctx: &RunContext, arguments: &str) -> std::result::Result<ToolOutput, ToolError> {
        let input: I = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let output = (self.f)(ctx.clone(), input).await?;
        ToolOutput::value(output)
    }
}

/// Adapt an async closure over typed input and output into a handler.
///
/// Arguments that fail to deserialize become [`ToolError::InvalidArguments`].
pub fn typed_handler<I, O, F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(RunContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<O, ToolError>> + Send + 'static,
{
    Arc::new(TypedHandler {
        f,
        _marker: PhantomData,
    })
}
