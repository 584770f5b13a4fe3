//! The agent orchestration loop.
//!
//! An [`Agent`] is a configuration value. [`Agent::run`] works on a copy of
//! it, so concurrent runs never race on configuration; only the injected
//! memory and toolset are shared.
//!
//! A run resolves its option loaders, renders the starter messages, resumes
//! any tool calls left pending in memory, then iterates: request a turn,
//! execute tool calls or finalize the reply, repeat until a reply is
//! accepted or the iteration cap is reached.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tandem_core::completer::{ChatCompleter, CompletionRequest, FinishReason, ToolChoice, Usage};
use tandem_core::context::RunContext;
use tandem_core::error::{Error, Result};
use tandem_core::memory::Memory;
use tandem_core::message::{
    AssistantMessage, Message, MessageBlock, ToolApprovalRequest, ToolCall, ToolCallApproval,
};
use tandem_core::stream::Streamer;
use tandem_core::tool::{HandoffTarget, StaticToolset, Tool, ToolHandler, Toolset};
use tandem_core::trace::{NoopTracer, SpanKind, Tracer};
use tandem_memory::StaticMemory;
use tracing::{debug, info, warn};

use crate::approval::{self, Approver};
use crate::dispatch::{Dispatcher, Outcome};
use crate::options::{self, Finalizer, Normalizer, OptionLoader};
use crate::prompt::{PromptLoader, PromptOption};
use crate::render::{builtin_values, render_message};

/// Default iteration cap per run.
pub const DEFAULT_ITERATIONS: usize = 120;

/// Default number of tool calls executed concurrently.
pub const DEFAULT_PARALLELISM: i64 = 5;

const REJECTED: &str = "rejected by the user";
const HANDED_OFF: &str = "aborted: conversation handed off";

type ModelMapper = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// What executing one batch of tool calls asks the loop to do next.
pub enum CallOutcome {
    /// Results are committed; request the next turn
    Continue,

    /// Transfer the conversation to `target`
    Handoff {
        target: Arc<dyn HandoffTarget>,
        message: Option<String>,
    },
}

impl std::fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Handoff { target, message } => f
                .debug_struct("Handoff")
                .field("target", &target.name())
                .field("message", message)
                .finish(),
        }
    }
}

/// An agent configuration.
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: String,
    completer: Arc<dyn ChatCompleter>,
    toolset: Arc<dyn Toolset>,
    /// Advertised to the backend, never dispatched
    builtin_tools: Vec<Tool>,
    memory: Arc<dyn Memory>,

    /// Starter messages, rendered on every request and never stored
    messages: Vec<Message>,
    values: BTreeMap<String, String>,

    model: String,
    model_mapper: Option<ModelMapper>,
    iterations: usize,
    parallelism: i64,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    tool_choice: Option<ToolChoice>,

    approvers: Vec<Approver>,
    finalizers: Vec<Finalizer>,
    normalizers: Vec<Normalizer>,
    loaders: Vec<Arc<dyn OptionLoader>>,

    tracer: Arc<dyn Tracer>,
    streamer: Option<Arc<dyn Streamer>>,
    strict_iterations: bool,
    span_metadata: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("iterations", &self.iterations)
            .field("parallelism", &self.parallelism)
            .field("approvers", &self.approvers.len())
            .field("finalizers", &self.finalizers.len())
            .field("loaders", &self.loaders.len())
            .field("strict_iterations", &self.strict_iterations)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent with an empty toolset and its own unlimited memory.
    pub fn new(name: impl Into<String>, completer: Arc<dyn ChatCompleter>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            completer,
            toolset: Arc::new(StaticToolset::new()),
            builtin_tools: Vec::new(),
            memory: Arc::new(StaticMemory::new()),
            messages: Vec::new(),
            values: BTreeMap::new(),
            model: String::new(),
            model_mapper: None,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            tool_choice: None,
            approvers: Vec::new(),
            finalizers: Vec::new(),
            normalizers: Vec::new(),
            loaders: Vec::new(),
            tracer: Arc::new(NoopTracer),
            streamer: None,
            strict_iterations: false,
            span_metadata: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn memory(&self) -> Arc<dyn Memory> {
        Arc::clone(&self.memory)
    }

    pub fn toolset(&self) -> Arc<dyn Toolset> {
        Arc::clone(&self.toolset)
    }

    /// The model id sent to the completer, after alias mapping.
    pub fn resolved_model(&self) -> String {
        self.model_mapper
            .as_ref()
            .and_then(|map| map(&self.model))
            .unwrap_or_else(|| self.model.clone())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_completer(mut self, completer: Arc<dyn ChatCompleter>) -> Self {
        self.completer = completer;
        self
    }

    pub fn with_toolset(mut self, toolset: Arc<dyn Toolset>) -> Self {
        self.toolset = toolset;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Translate model aliases into backend model ids. Unmapped names pass
    /// through unchanged.
    pub fn with_model_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.model_mapper = Some(Arc::new(mapper));
        self
    }

    pub fn with_system_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::system(content));
        self
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn with_assistant_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::assistant(content));
        self
    }

    /// Replace the starter messages.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Merge template values used to render the starter messages.
    pub fn with_values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.values
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Iteration cap per run. At least one iteration always runs.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Concurrent tool calls per batch: 1 is sequential, 0 or less is
    /// unbounded.
    pub fn with_tool_parallelism(mut self, parallelism: i64) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_approver(mut self, approver: Approver) -> Self {
        self.approvers.push(approver);
        self
    }

    /// Approve pending calls by id, typically when resuming after an
    /// approval request.
    pub fn with_approvals<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_approver(approval::approve_ids(ids))
    }

    pub fn with_rejections<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_approver(approval::reject_ids(ids))
    }

    pub fn with_auto_approve_all(self) -> Self {
        self.with_approver(approval::approve_all())
    }

    pub fn with_auto_approve_tools<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_approver(approval::approve_tools(names))
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizers.push(finalizer);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    /// Only accept replies that are valid JSON.
    pub fn with_structured_output(self) -> Self {
        self.with_finalizer(options::structured_output())
    }

    pub fn with_option_loader(mut self, loader: Arc<dyn OptionLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Resolve starter messages from `loader` at the start of every run.
    pub fn with_prompt(self, loader: Arc<dyn PromptLoader>) -> Self {
        self.with_option_loader(Arc::new(PromptOption { loader }))
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_streamer(mut self, streamer: Arc<dyn Streamer>) -> Self {
        self.streamer = Some(streamer);
        self
    }

    /// Register a tool on this agent only. The shared toolset is left
    /// untouched: the tool lands in an overlay that falls back to it.
    pub fn with_tool(mut self, tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        let overlay = StaticToolset::new()
            .with_fallback(Arc::clone(&self.toolset))
            .with_tool(tool, handler);
        self.toolset = Arc::new(overlay);
        self
    }

    /// Advertise a tool the backend executes itself (see [`Tool::builtin`]).
    pub fn with_builtin_tool(mut self, tool: Tool) -> Self {
        self.builtin_tools.push(tool);
        self
    }

    /// Report iteration cap exhaustion as [`Error::Incomplete`] instead of
    /// returning the last draft.
    pub fn with_strict_iterations(mut self, strict: bool) -> Self {
        self.strict_iterations = strict;
        self
    }

    /// Metadata recorded on the run span.
    pub fn with_span_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.span_metadata.insert(key.into(), value);
        self
    }

    /// Run the agent until it produces an accepted reply.
    pub async fn run(&self, ctx: &RunContext) -> Result<AssistantMessage> {
        self.run_with(ctx, |agent| agent).await
    }

    /// Run with per-invocation overrides applied to a copy of the agent.
    pub async fn run_with<F>(&self, ctx: &RunContext, configure: F) -> Result<AssistantMessage>
    where
        F: FnOnce(Agent) -> Agent + Send,
    {
        let agent = configure(self.clone());
        let (mut span, run_ctx) = agent.tracer.start_span(ctx, &agent.name, SpanKind::Task);

        let agent = match agent.resolve_options(&run_ctx).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Option loader failed");
                span.close_with_error(&e.to_string());
                return Err(e);
            }
        };
        for (key, value) in &agent.span_metadata {
            span.set_metadata(key, value.clone());
        }

        info!(agent = %agent.name, model = %agent.resolved_model(), "Run started");
        let mut usage = Usage::default();
        let result = agent.drive(&run_ctx, &mut usage).await;
        span.set_metadata("usage", serde_json::to_value(usage).unwrap_or_default());
        match &result {
            Ok(reply) => {
                info!(agent = %agent.name, total_tokens = usage.total_tokens, "Run finished");
                span.close_with_output(json!(reply.text()));
            }
            Err(Error::ApprovalRequired(request)) => {
                info!(agent = %agent.name, pending = ?request.call_ids(), "Run paused for approval");
                span.set_metadata("pending_calls", json!(request.call_ids()));
                span.close();
            }
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "Run failed");
                span.close_with_error(&e.to_string());
            }
        }
        result
    }

    async fn resolve_options(self, ctx: &RunContext) -> Result<Agent> {
        let loaders = self.loaders.clone();
        let mut agent = self;
        for loader in loaders {
            agent = loader.load(ctx, agent).await?;
        }
        Ok(agent)
    }

    /// `usage` accumulates every completed turn of this run.
    async fn drive(&self, ctx: &RunContext, usage: &mut Usage) -> Result<AssistantMessage> {
        let values = builtin_values(&self.name, &self.values);
        let starter: Vec<Message> = self
            .messages
            .iter()
            .map(|m| render_message(m, &values))
            .collect();

        // A previous run may have stopped at the approval gate.
        if let Some(Message::Assistant(pending)) = self.memory.list().await.pop()
            && pending.has_tool_calls()
        {
            debug!(agent = %self.name, "Resuming unresolved tool calls");
            if let CallOutcome::Handoff { target, message } = self.call(ctx, &pending).await? {
                return self.hand_off(ctx, target, message).await;
            }
        }

        let mut last_reply = None;
        for iteration in 1..=self.iterations {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let turn = self.complete(ctx, &starter, iteration).await?;
            usage.add(&turn.usage);

            // Arguments of a call cut off by the token limit are incomplete JSON
            let reply = if turn.finish_reason == FinishReason::Length && turn.reply.has_tool_calls() {
                warn!(agent = %self.name, iteration, "Reply truncated inside a tool call, dropping its calls");
                without_tool_calls(turn.reply)
            } else {
                turn.reply
            };

            if reply.has_tool_calls() {
                self.memory.append(Message::Assistant(reply.clone())).await?;
                let outcome = self.call(ctx, &reply).await?;
                last_reply = Some(reply);
                if let CallOutcome::Handoff { target, message } = outcome {
                    return self.hand_off(ctx, target, message).await;
                }
                continue;
            }

            let reply = self.normalizers.iter().fold(reply, |reply, normalize| normalize(reply));
            self.memory.append(Message::Assistant(reply.clone())).await?;

            match self.finalizers.iter().find_map(|finalize| finalize(&reply).err()) {
                None => return Ok(reply),
                Some(detail) => {
                    warn!(agent = %self.name, iteration, error = %detail, "Reply rejected by finalizer");
                    self.memory.append(Message::user(format!("ERROR: {detail}"))).await?;
                    last_reply = Some(reply);
                }
            }
        }

        let last_reply = last_reply.unwrap_or_default();
        if self.strict_iterations {
            return Err(Error::Incomplete {
                iterations: self.iterations,
                last_reply: Box::new(last_reply),
            });
        }
        warn!(agent = %self.name, iterations = self.iterations, "Iteration limit reached, returning last draft");
        Ok(last_reply)
    }

    /// One model turn. The reply is not stored here.
    async fn complete(&self, ctx: &RunContext, starter: &[Message], iteration: usize) -> Result<Turn> {
        let mut messages = starter.to_vec();
        messages.extend(self.memory.list().await);

        let mut tools = self.toolset.list();
        tools.extend(self.builtin_tools.iter().cloned());
        let mut request = CompletionRequest::new(self.resolved_model(), messages);
        request.tool_choice = (!tools.is_empty()).then(|| self.tool_choice.unwrap_or_default());
        request.tools = tools;
        request.parallel_tool_calls = self.parallelism != 1;
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.top_k = self.top_k;
        request.max_tokens = self.max_tokens;
        request.streamer = self.streamer.clone();

        let (mut span, llm_ctx) = self.tracer.start_span(ctx, &request.model, SpanKind::Llm);
        span.set_input(serde_json::to_value(&request.messages).unwrap_or_default());
        span.set_metadata("iteration", json!(iteration));
        span.set_metadata("tools", json!(request.tools.len()));
        debug!(
            agent = %self.name,
            iteration,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Requesting completion"
        );

        let result = tokio::select! {
            biased;
            _ = llm_ctx.cancelled() => Err(Error::Cancelled),
            response = self.completer.complete(&llm_ctx, request) => response.map_err(Error::from),
        };

        match result {
            Ok(response) => {
                let usage = response.usage;
                span.set_metric("prompt_tokens", f64::from(usage.prompt_tokens));
                span.set_metric("completion_tokens", f64::from(usage.completion_tokens));
                span.set_metric("total_tokens", f64::from(usage.total_tokens));
                span.set_metric("cached_prompt_tokens", f64::from(usage.cached_prompt_tokens));
                span.set_metadata("finish_reason", json!(response.finish_reason));
                let finish_reason = response.finish_reason;
                let reply = response.into_message();
                span.close_with_output(serde_json::to_value(&reply).unwrap_or_default());
                Ok(Turn {
                    reply,
                    finish_reason,
                    usage,
                })
            }
            Err(e) => {
                span.close_with_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Approve and execute the tool calls of `reply`, then commit one result
    /// or error per call to memory in call order.
    ///
    /// Calls that already have a result recorded after `reply` are skipped,
    /// so calling this again on a committed batch writes nothing. If any
    /// call is undecided nothing runs and the pending calls are returned as
    /// [`Error::ApprovalRequired`].
    pub async fn call(&self, ctx: &RunContext, reply: &AssistantMessage) -> Result<CallOutcome> {
        let resolved = self.resolved_call_ids(reply).await;
        let pending: Vec<(usize, &ToolCall)> = reply
            .content
            .iter()
            .enumerate()
            .filter_map(|(index, block)| match block {
                MessageBlock::ToolCall(call) if !resolved.contains(&call.id) => Some((index, call)),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return Ok(CallOutcome::Continue);
        }

        let votes: Vec<ToolCallApproval> = pending
            .iter()
            .map(|(_, call)| approval::evaluate(&self.approvers, call))
            .collect();
        let undecided: Vec<ToolCall> = pending
            .iter()
            .zip(&votes)
            .filter(|(_, vote)| **vote == ToolCallApproval::Undecided)
            .map(|((_, call), _)| (*call).clone())
            .collect();
        if !undecided.is_empty() {
            return Err(Error::ApprovalRequired(ToolApprovalRequest { calls: undecided }));
        }

        let approved: Vec<(usize, ToolCall)> = pending
            .iter()
            .zip(&votes)
            .filter(|(_, vote)| **vote == ToolCallApproval::Approved)
            .map(|((index, call), _)| (*index, (*call).clone()))
            .collect();
        debug!(
            agent = %self.name,
            approved = approved.len(),
            rejected = pending.len() - approved.len(),
            "Executing tool calls"
        );

        let dispatcher = Dispatcher {
            toolset: Arc::clone(&self.toolset),
            tracer: Arc::clone(&self.tracer),
            streamer: self.streamer.clone(),
            parallelism: self.parallelism,
        };
        let mut outcomes = dispatcher.dispatch(ctx, approved).await.into_iter();

        // A cancelled batch writes nothing.
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut handoff = None;
        let mut results = Vec::with_capacity(pending.len());
        for ((_, call), vote) in pending.iter().zip(&votes) {
            if *vote == ToolCallApproval::Rejected {
                results.push(Message::tool_error(&call.id, REJECTED));
                continue;
            }
            let message = match outcomes.next() {
                Some(Outcome::Value(value)) => Message::tool_result(&call.id, value),
                Some(Outcome::Error(error)) => Message::tool_error(&call.id, error),
                Some(Outcome::Handoff { target, message }) if handoff.is_none() => {
                    let result = Message::tool_result(&call.id, json!({ "handoff": target.name() }));
                    handoff = Some(CallOutcome::Handoff { target, message });
                    result
                }
                Some(Outcome::Handoff { .. }) | Some(Outcome::NotStarted) => Message::tool_error(&call.id, HANDED_OFF),
                None => Message::tool_error(&call.id, "tool task did not complete"),
            };
            results.push(message);
        }

        self.memory.append_all(results).await?;
        Ok(handoff.unwrap_or(CallOutcome::Continue))
    }

    /// Ids of calls in `reply` that already have a result in memory.
    async fn resolved_call_ids(&self, reply: &AssistantMessage) -> HashSet<String> {
        let history = self.memory.list().await;
        let Some(position) = history
            .iter()
            .rposition(|m| matches!(m, Message::Assistant(stored) if stored == reply))
        else {
            return HashSet::new();
        };
        history[position + 1..]
            .iter()
            .filter_map(|m| m.call_id().map(str::to_string))
            .collect()
    }

    async fn hand_off(
        &self,
        ctx: &RunContext,
        target: Arc<dyn HandoffTarget>,
        message: Option<String>,
    ) -> Result<AssistantMessage> {
        info!(from = %self.name, to = %target.name(), "Handing off conversation");
        if let Some(note) = message {
            self.memory.append(Message::assistant(note)).await?;
        }
        target.take_over(ctx, Arc::clone(&self.memory)).await
    }
}

/// A model reply with the bookkeeping the loop needs from its response.
struct Turn {
    reply: AssistantMessage,
    finish_reason: FinishReason,
    usage: Usage,
}

fn without_tool_calls(mut reply: AssistantMessage) -> AssistantMessage {
    reply
        .content
        .retain(|block| !matches!(block, MessageBlock::ToolCall(_)));
    reply
}

#[async_trait]
impl HandoffTarget for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_over(&self, ctx: &RunContext, memory: Arc<dyn Memory>) -> Result<AssistantMessage> {
        self.run_with(ctx, move |agent| agent.with_memory(memory)).await
    }
}
