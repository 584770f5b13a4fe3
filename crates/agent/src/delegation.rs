//! Multi-agent delegation tools.
//!
//! Three ways for an agent to use other agents:
//!
//! - handoff: `delegate_to` transfers the whole conversation to a
//!   specialist, which continues on the same memory
//! - consultation: `ask_specialist` runs a specialist on a fresh memory and
//!   returns its answer as a tool result
//! - orchestration: `execute_tasks` runs a plan of tasks one after another,
//!   each worker reporting through `complete_task`

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tandem_core::context::RunContext;
use tandem_core::error::ToolError;
use tandem_core::message::{AssistantMessage, Message};
use tandem_core::tool::{HandoffTarget, Tool, ToolHandler, ToolOutput, handler_fn, typed_handler};
use tandem_memory::StaticMemory;
use tracing::{debug, info, warn};

use crate::agent::Agent;

const CONTEXT_PREAMBLE: &str = "The summary of the conversation so far:\n";
const TASK_PREAMBLE: &str = "You have to perform the task described below and call `complete_task` to communicate the results. \n\nThe task: ";
const MISSING_REPORT: &str = "you must call `complete_task` tool to report task completion status";

/// Agents addressable by name.
#[derive(Debug, Clone)]
struct Roster {
    agents: Arc<Vec<Arc<Agent>>>,
}

impl Roster {
    fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents: Arc::new(agents.into_iter().map(Arc::new).collect()),
        }
    }

    fn find(&self, name: &str) -> Result<Arc<Agent>, ToolError> {
        self.agents
            .iter()
            .find(|agent| agent.name() == name)
            .cloned()
            .ok_or_else(|| {
                let valid: Vec<&str> = self.agents.iter().map(|a| a.name()).collect();
                ToolError::failed(format!(
                    "unknown specialist {name:?}, valid specialists are: {}",
                    valid.join(", ")
                ))
            })
    }

    fn listing(&self) -> serde_json::Value {
        self.agents
            .iter()
            .map(|agent| json!({ "name": agent.name(), "description": agent.description() }))
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    fn list_tool(&self) -> (Tool, Arc<dyn ToolHandler>) {
        let roster = self.clone();
        (
            Tool::new("list_specialists", "List the specialists available for delegation")
                .with_input_schema(json!({ "type": "object", "properties": {} })),
            handler_fn(move |_ctx, _args| {
                let listing = roster.listing();
                async move { Ok(ToolOutput::Value(listing)) }
            }),
        )
    }
}

#[derive(Debug, Deserialize)]
struct DelegateInput {
    specialist: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AskInput {
    specialist: String,
    task: String,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct PlanInput {
    #[serde(default)]
    context: String,
    tasks: Vec<TaskInput>,
}

#[derive(Debug, Deserialize)]
struct TaskInput {
    agent: String,
    task: String,
}

/// Status a worker reports through `complete_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedStatus {
    Complete,
    Failure,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionReport {
    status: ReportedStatus,
    #[serde(default)]
    reasoning: String,
}

/// Final state of one task in an `execute_tasks` plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Complete,
    Failure,
    /// The worker errored or never reported
    Failed,
    /// Not attempted because an earlier task failed
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub agent: String,
    pub task: String,
    pub status: TaskStatus,
    pub outcome: String,
}

impl Agent {
    /// Let the model hand the conversation to one of `agents`.
    pub fn with_handoff_tool(self, agents: Vec<Agent>) -> Self {
        let roster = Roster::new(agents);
        let (list, list_handler) = roster.list_tool();
        let delegate = Tool::new(
            "delegate_to",
            "Hand the conversation over to a specialist. The specialist continues from here.",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "specialist": { "type": "string", "enum": roster.names() },
                "message": { "type": "string", "description": "Note for the specialist" }
            },
            "required": ["specialist"]
        }));
        let delegate_handler = handler_fn(move |_ctx, args| {
            let roster = roster.clone();
            async move {
                let input: DelegateInput =
                    serde_json::from_str(&args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                let target: Arc<dyn HandoffTarget> = roster.find(&input.specialist)?;
                debug!(specialist = %input.specialist, "Delegating conversation");
                Ok::<_, ToolError>(ToolOutput::handoff(target, input.message))
            }
        });
        self.with_tool(list, list_handler).with_tool(delegate, delegate_handler)
    }

    /// Let the model consult one of `agents` without giving up the
    /// conversation.
    pub fn with_specialist_tool(self, agents: Vec<Agent>) -> Self {
        let roster = Roster::new(agents);
        let (list, list_handler) = roster.list_tool();
        let ask = Tool::new(
            "ask_specialist",
            "Ask a specialist to perform a task and return its answer",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "specialist": { "type": "string", "enum": roster.names() },
                "task": { "type": "string" },
                "context": { "type": "string", "description": "Summary of the conversation so far" }
            },
            "required": ["specialist", "task"]
        }));
        let ask_handler = typed_handler(move |ctx: RunContext, input: AskInput| {
            let roster = roster.clone();
            async move {
                let specialist = roster.find(&input.specialist)?;
                let memory = Arc::new(StaticMemory::with_messages(vec![
                    Message::assistant(format!("{CONTEXT_PREAMBLE}{}", input.context)),
                    Message::user(input.task),
                ]));
                let reply = specialist
                    .run_with(&ctx, move |agent| agent.with_memory(memory))
                    .await
                    .map_err(|e| ToolError::failed(format!("specialist {:?} failed: {e}", input.specialist)))?;
                Ok::<_, ToolError>(reply.text())
            }
        });
        self.with_tool(list, list_handler).with_tool(ask, ask_handler)
    }

    /// Let the model run a plan of tasks across `agents`, in order. The
    /// first failing task stops the plan.
    pub fn with_orchestrator_tool(self, agents: Vec<Agent>) -> Self {
        let roster = Roster::new(agents);
        let execute = Tool::new(
            "execute_tasks",
            "Run a list of tasks, each performed by a named agent, one after another",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "context": { "type": "string", "description": "What every agent needs to know" },
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "agent": { "type": "string", "enum": roster.names() },
                            "task": { "type": "string" }
                        },
                        "required": ["agent", "task"]
                    }
                }
            },
            "required": ["tasks"]
        }));
        let handler = typed_handler(move |ctx: RunContext, plan: PlanInput| {
            let roster = roster.clone();
            async move { Ok::<_, ToolError>(execute_plan(&ctx, &roster, plan).await) }
        });
        self.with_tool(execute, handler)
    }
}

async fn execute_plan(ctx: &RunContext, roster: &Roster, plan: PlanInput) -> Vec<TaskReport> {
    info!(tasks = plan.tasks.len(), "Executing task plan");
    let mut reports = Vec::with_capacity(plan.tasks.len());
    let mut stopped = false;

    for task in plan.tasks {
        if stopped {
            reports.push(TaskReport {
                agent: task.agent,
                task: task.task,
                status: TaskStatus::Skipped,
                outcome: String::new(),
            });
            continue;
        }

        let (status, outcome) = match roster.find(&task.agent) {
            Ok(worker) => run_task(ctx, &worker, &plan.context, &task.task).await,
            Err(e) => (TaskStatus::Failed, format!("ERROR: {e}")),
        };
        if status != TaskStatus::Complete {
            warn!(agent = %task.agent, ?status, "Task did not complete, stopping plan");
            stopped = true;
        }
        reports.push(TaskReport {
            agent: task.agent,
            task: task.task,
            status,
            outcome,
        });
    }
    reports
}

async fn run_task(ctx: &RunContext, worker: &Agent, context: &str, task: &str) -> (TaskStatus, String) {
    let report: Arc<Mutex<Option<CompletionReport>>> = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&report);
    let complete_task = Tool::new("complete_task", "Report the outcome of the task you were given")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["COMPLETE", "FAILURE"] },
                "reasoning": { "type": "string" }
            },
            "required": ["status", "reasoning"]
        }));
    let complete_handler = typed_handler(move |_ctx: RunContext, input: CompletionReport| {
        let slot = Arc::clone(&slot);
        async move {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(input);
            Ok::<_, ToolError>("recorded")
        }
    });

    let check = Arc::clone(&report);
    let memory = Arc::new(StaticMemory::with_messages(vec![
        Message::assistant(context),
        Message::user(format!("{TASK_PREAMBLE}{task}")),
    ]));

    let result = worker
        .run_with(ctx, move |agent| {
            agent
                .with_memory(memory)
                .with_tool(complete_task, complete_handler)
                .with_auto_approve_tools(["complete_task"])
                .with_finalizer(Arc::new(move |_reply: &AssistantMessage| {
                    if check.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
                        Ok(())
                    } else {
                        Err(MISSING_REPORT.to_string())
                    }
                }))
        })
        .await;

    if let Err(e) = result {
        return (TaskStatus::Failed, format!("ERROR: {e}"));
    }
    let reported = report.lock().unwrap_or_else(PoisonError::into_inner).take();
    match reported {
        Some(CompletionReport {
            status: ReportedStatus::Complete,
            reasoning,
        }) => (TaskStatus::Complete, reasoning),
        Some(CompletionReport {
            status: ReportedStatus::Failure,
            reasoning,
        }) => (TaskStatus::Failure, reasoning),
        None => (TaskStatus::Failed, "ERROR: agent did not respond".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedCompleter, tool_calls};
    use tandem_core::completer::CompletionResponse;

    fn respond(responses: Vec<CompletionResponse>) -> Arc<ScriptedCompleter> {
        Arc::new(ScriptedCompleter::new(responses))
    }

    #[tokio::test]
    async fn unknown_specialist_lists_valid_names() {
        let roster = Roster::new(vec![
            Agent::new("writer", respond(vec![])),
            Agent::new("critic", respond(vec![])),
        ]);
        let err = roster.find("poet").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"unknown specialist "poet", valid specialists are: writer, critic"#
        );
    }

    #[tokio::test]
    async fn list_specialists_describes_each_agent() {
        let agent = Agent::new("lead", respond(vec![]))
            .with_specialist_tool(vec![Agent::new("writer", respond(vec![])).with_description("Writes prose")]);
        let out = agent
            .toolset()
            .call(&RunContext::new(), "list_specialists", "{}")
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Value(v) if v == json!([{"name": "writer", "description": "Writes prose"}])));
    }

    #[tokio::test]
    async fn ask_specialist_runs_on_fresh_memory() {
        let specialist_completer = respond(vec![CompletionResponse::text("a haiku")]);
        let writer = Agent::new("writer", specialist_completer.clone());
        let lead = Agent::new("lead", respond(vec![])).with_specialist_tool(vec![writer.clone()]);

        let out = lead
            .toolset()
            .call(
                &RunContext::new(),
                "ask_specialist",
                r#"{"specialist":"writer","task":"write a haiku","context":"user likes autumn"}"#,
            )
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Value(v) if v == json!("a haiku")));

        let seen = &specialist_completer.requests()[0].messages;
        assert_eq!(
            seen[0],
            Message::assistant("The summary of the conversation so far:\nuser likes autumn")
        );
        assert_eq!(seen[1], Message::user("write a haiku"));
        assert!(writer.memory().list().await.is_empty());
    }

    #[tokio::test]
    async fn delegate_to_returns_handoff() {
        let lead = Agent::new("lead", respond(vec![]))
            .with_handoff_tool(vec![Agent::new("billing", respond(vec![]))]);
        let out = lead
            .toolset()
            .call(&RunContext::new(), "delegate_to", r#"{"specialist":"billing","message":"over to you"}"#)
            .await
            .unwrap();
        match out {
            ToolOutput::Handoff { target, message } => {
                assert_eq!(target.name(), "billing");
                assert_eq!(message.as_deref(), Some("over to you"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn plan_stops_after_failure() {
        let researcher = Agent::new(
            "researcher",
            respond(vec![
                tool_calls(&[("r1", "complete_task", r#"{"status":"COMPLETE","reasoning":"found 3 sources"}"#)]),
                CompletionResponse::text("done"),
            ]),
        );
        let writer = Agent::new(
            "writer",
            respond(vec![
                tool_calls(&[("w1", "complete_task", r#"{"status":"FAILURE","reasoning":"sources too thin"}"#)]),
                CompletionResponse::text("sorry"),
            ]),
        );
        let lead = Agent::new("lead", respond(vec![])).with_orchestrator_tool(vec![researcher, writer]);

        let out = lead
            .toolset()
            .call(
                &RunContext::new(),
                "execute_tasks",
                r#"{"context":"topic: tides","tasks":[
                    {"agent":"researcher","task":"find sources"},
                    {"agent":"writer","task":"draft"},
                    {"agent":"researcher","task":"fact check"}
                ]}"#,
            )
            .await
            .unwrap();
        let ToolOutput::Value(value) = out else {
            panic!("expected a value");
        };
        let reports: Vec<TaskReport> = serde_json::from_value(value).unwrap();
        let statuses: Vec<TaskStatus> = reports.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Complete, TaskStatus::Failure, TaskStatus::Skipped]);
        assert_eq!(reports[0].outcome, "found 3 sources");
        assert_eq!(reports[1].outcome, "sources too thin");
    }

    #[tokio::test]
    async fn silent_worker_is_retried_then_failed() {
        // The finalizer keeps rejecting until the iteration cap runs out.
        let worker = Agent::new(
            "worker",
            respond(vec![CompletionResponse::text("I did it"), CompletionResponse::text("really")]),
        )
        .with_iterations(2);
        let (status, outcome) = run_task(&RunContext::new(), &worker, "ctx", "do it").await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(outcome, "ERROR: agent did not respond");
    }
}
