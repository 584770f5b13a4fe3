//! Approval gate: policy checks that must clear before a tool call runs.
//!
//! Every approver votes on every call. Votes are combined with
//! [`ToolCallApproval::aggregate`]: any rejection wins, then any approval,
//! otherwise the call stays undecided and the run stops with an approval
//! request.

use std::collections::HashSet;
use std::sync::Arc;

use tandem_core::message::{ToolCall, ToolCallApproval};

/// A vote on a single tool call.
pub type Approver = Arc<dyn Fn(&ToolCall) -> ToolCallApproval + Send + Sync>;

/// Approve the calls with these ids.
pub fn approve_ids<I, S>(ids: I) -> Approver
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
    Arc::new(move |call: &ToolCall| {
        if ids.contains(&call.id) {
            ToolCallApproval::Approved
        } else {
            ToolCallApproval::Undecided
        }
    })
}

/// Reject the calls with these ids.
pub fn reject_ids<I, S>(ids: I) -> Approver
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
    Arc::new(move |call: &ToolCall| {
        if ids.contains(&call.id) {
            ToolCallApproval::Rejected
        } else {
            ToolCallApproval::Undecided
        }
    })
}

/// Approve every call.
pub fn approve_all() -> Approver {
    Arc::new(|_: &ToolCall| ToolCallApproval::Approved)
}

/// Approve every call to the named tools.
pub fn approve_tools<I, S>(names: I) -> Approver
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: HashSet<String> = names.into_iter().map(Into::into).collect();
    Arc::new(move |call: &ToolCall| {
        if names.contains(&call.name) {
            ToolCallApproval::Approved
        } else {
            ToolCallApproval::Undecided
        }
    })
}

/// The combined vote of `approvers` on `call`.
pub fn evaluate(approvers: &[Approver], call: &ToolCall) -> ToolCallApproval {
    ToolCallApproval::aggregate(approvers.iter().map(|approver| approver(call)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, "{}")
    }

    #[test]
    fn no_approvers_leaves_calls_undecided() {
        assert_eq!(evaluate(&[], &call("c1", "lookup")), ToolCallApproval::Undecided);
    }

    #[test]
    fn rejection_beats_approval() {
        let approvers = vec![approve_all(), reject_ids(["c1"])];
        assert_eq!(evaluate(&approvers, &call("c1", "lookup")), ToolCallApproval::Rejected);
        assert_eq!(evaluate(&approvers, &call("c2", "lookup")), ToolCallApproval::Approved);
    }

    #[test]
    fn tool_name_approval() {
        let approvers = vec![approve_tools(["lookup"])];
        assert_eq!(evaluate(&approvers, &call("c1", "lookup")), ToolCallApproval::Approved);
        assert_eq!(evaluate(&approvers, &call("c2", "delete")), ToolCallApproval::Undecided);
    }

    #[test]
    fn id_approval() {
        let approvers = vec![approve_ids(vec!["c2".to_string()])];
        assert_eq!(evaluate(&approvers, &call("c2", "delete")), ToolCallApproval::Approved);
        assert_eq!(evaluate(&approvers, &call("c3", "delete")), ToolCallApproval::Undecided);
    }
}
