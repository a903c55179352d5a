//! Tool failure types

use std::time::Duration;
use thiserror::Error;

/// Why a tool call failed.
///
/// Tool failures never reach the caller of a turn: the invoker logs them and
/// proceeds without an attachment candidate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Input was not acceptable to the tool
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Execution exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Transient network or service error
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external system answered with something unusable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ToolError {
    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Timeout(_) | ToolError::Transient(_))
    }
}
