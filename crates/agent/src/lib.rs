//! The agent orchestration loop: the heart of Tandem.
//!
//! An agent follows a **Request → Act → Finalize** cycle:
//!
//! 1. **Request** a turn from the completer with the starter messages and
//!    the conversation so far
//! 2. **If tool calls**: check approvals, execute approved calls
//!    concurrently, commit the results in call order, loop back to step 1
//! 3. **If text**: run finalizers; a rejection is fed back to the model as
//!    `ERROR: ...` and the loop asks again
//!
//! The loop stops when a reply is accepted, a call needs approval, a tool
//! hands the conversation to another agent, or the iteration cap is reached.

pub mod agent;
pub mod approval;
pub mod delegation;
mod dispatch;
pub mod options;
pub mod prompt;
pub mod render;
pub mod settings;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, CallOutcome, DEFAULT_ITERATIONS, DEFAULT_PARALLELISM};
pub use approval::{Approver, approve_all, approve_ids, approve_tools, reject_ids};
pub use delegation::{ReportedStatus, TaskReport, TaskStatus};
pub use options::{Finalizer, Normalizer, OptionLoader, loader_fn, structured_output};
pub use prompt::{Prompt, PromptLoader, StaticPrompt};
pub use settings::memory_from_settings;
