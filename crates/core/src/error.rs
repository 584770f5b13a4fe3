//! Error types for the Tandem domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what a run
//! returns to its caller.

use thiserror::Error;

use crate::message::{AssistantMessage, ToolApprovalRequest};

/// The top-level error type returned by an agent run.
///
/// Only conditions the conversation cannot absorb end up here. Tool failures
/// and finalizer rejections are fed back to the model as messages instead.
#[derive(Debug, Error)]
pub enum Error {
    // --- Approval gate ---
    #[error("{0}")]
    ApprovalRequired(ToolApprovalRequest),

    // --- Completer errors ---
    #[error("Completer error: {0}")]
    Completer(#[from] CompleterError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Dynamic option / prompt loading ---
    #[error("Failed to load options: {0}")]
    Loader(String),

    // --- Cancellation ---
    #[error("Run cancelled")]
    Cancelled,

    // --- Strict iteration mode ---
    #[error("Iteration limit of {iterations} reached without an accepted reply")]
    Incomplete {
        iterations: usize,
        last_reply: Box<AssistantMessage>,
    },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The pending approval request, if this error is an approval gate.
    pub fn approval_request(&self) -> Option<&ToolApprovalRequest> {
        match self {
            Self::ApprovalRequired(req) => Some(req),
            _ => None,
        }
    }

    /// Whether the caller can resume the run by supplying approvals.
    pub fn is_approval_required(&self) -> bool {
        matches!(self, Self::ApprovalRequired(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum CompleterError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted record at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool {0:?}")]
    NotFound(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("tool {0:?} panicked: {1}")]
    Panicked(String, String),

    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Shorthand for a generic execution failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream consumer closed")]
    Closed,

    #[error("Stream delivery failed: {0}")]
    Delivery(String),
}
