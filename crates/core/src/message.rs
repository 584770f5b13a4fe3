//! Message domain types.
//!
//! These are the value objects that flow through the entire system:
//! the caller appends a user message → the agent asks the completer →
//! the assistant reply and any tool results are appended to memory.
//!
//! Messages are immutable once appended. An assistant message keeps its
//! content as an ordered list of blocks; that order is replayed verbatim to
//! the backend.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System instructions
    System { content: String },

    /// The end user (or a synthetic user-visible notice from the agent)
    User { content: String },

    /// A model turn
    Assistant(AssistantMessage),

    /// Successful tool execution, joined to its call by `call_id`
    ToolResult {
        call_id: String,
        result: serde_json::Value,
    },

    /// Failed or rejected tool execution, joined to its call by `call_id`
    ToolError { call_id: String, error: String },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant message holding a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage::from_text(text))
    }

    /// Create a tool result message.
    pub fn tool_result(call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            result,
        }
    }

    /// Create a tool error message.
    pub fn tool_error(call_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::ToolError {
            call_id: call_id.into(),
            error: error.to_string(),
        }
    }

    /// The call id for tool result / tool error messages.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { call_id, .. } | Self::ToolError { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// The text a backend adapter should send for this message.
    ///
    /// Tool results render strings verbatim, `null` as empty, and anything
    /// else as compact JSON. Tool errors are prefixed with `ERROR: `.
    pub fn model_text(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } => content.clone(),
            Self::Assistant(m) => m.text(),
            Self::ToolResult { result, .. } => match result {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::ToolError { error, .. } => format!("ERROR: {error}"),
        }
    }
}

impl From<AssistantMessage> for Message {
    fn from(m: AssistantMessage) -> Self {
        Self::Assistant(m)
    }
}

/// A model turn: an ordered sequence of content blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<MessageBlock>,
}

impl AssistantMessage {
    pub fn new(content: Vec<MessageBlock>) -> Self {
        Self { content }
    }

    /// An assistant message with one text block.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![MessageBlock::Text { text: text.into() }],
        }
    }

    /// Concatenation of every text block, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                MessageBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls the orchestration layer must execute, in block order.
    ///
    /// Server-side tool calls are executed by the backend and are not included.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                MessageBlock::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, MessageBlock::ToolCall(_)))
    }

    /// Deserialize the reply text as JSON, tolerating a ```json fence.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> crate::error::Result<T> {
        if self.has_tool_calls() {
            return Err(Error::Serialization(serde::de::Error::custom(
                "assistant message contains tool usage",
            )));
        }
        Ok(serde_json::from_str(json_payload(&self.text()))?)
    }
}

/// Strip a markdown code fence (and a leading `json` tag) from model output.
pub fn json_payload(text: &str) -> &str {
    let trimmed = text.trim().trim_matches('`');
    trimmed.strip_prefix("json").unwrap_or(trimmed).trim()
}

/// One block of assistant content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    /// Plain text
    Text { text: String },

    /// A call the agent must execute
    ToolCall(ToolCall),

    /// Extended reasoning, with the backend's verification signature
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        signature: String,
    },

    /// A built-in tool executed by the backend itself (web search, etc.)
    ServerToolCall(ToolCall),

    /// The backend's own result for a server tool call
    ToolResultInline {
        call_id: String,
        result: serde_json::Value,
    },
}

/// A model-requested invocation of a registered tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique per request; joins the call to its result
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as raw JSON text
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Arguments with empty and `null` payloads normalized to `{}`.
    pub fn normalized_arguments(&self) -> &str {
        let trimmed = self.arguments.trim();
        if trimmed.is_empty() || trimmed == "null" {
            "{}"
        } else {
            &self.arguments
        }
    }
}

/// An approver's vote on a single tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallApproval {
    #[default]
    Undecided,
    Approved,
    Rejected,
}

impl ToolCallApproval {
    /// Combine approver votes: any rejection wins, then any approval,
    /// otherwise the call stays undecided.
    pub fn aggregate(votes: impl IntoIterator<Item = ToolCallApproval>) -> Self {
        let mut approved = false;
        for vote in votes {
            match vote {
                Self::Rejected => return Self::Rejected,
                Self::Approved => approved = true,
                Self::Undecided => {}
            }
        }
        if approved {
            Self::Approved
        } else {
            Self::Undecided
        }
    }
}

/// Calls that are waiting for a human decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolApprovalRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<ToolCall>,
}

impl ToolApprovalRequest {
    pub fn call_ids(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.id.as_str()).collect()
    }
}

impl std::fmt::Display for ToolApprovalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.calls.iter().map(|c| c.name.as_str()).collect();
        write!(f, "tool approval is required: {}", names.join(", "))
    }
}
