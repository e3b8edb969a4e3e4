//! ---
//! hm_section: "01-core-functionality"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Request error taxonomy of the cluster orchestrator."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use std::fmt;

use hm_kind::ToolError;
use hm_state::StateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of a request-facing operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Request input failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A cluster with this name is already tracked.
    #[error("cluster `{0}` already exists")]
    AlreadyExists(String),
    /// Another request is creating this cluster right now.
    #[error("cluster `{0}` is already being created")]
    CreateInProgress(String),
    /// No cluster with this name is tracked.
    #[error("cluster `{0}` not found")]
    NotFound(String),
    /// The reserved infrastructure cluster cannot be deleted.
    #[error("cluster `{0}` is the infrastructure cluster and cannot be deleted")]
    Protected(String),
    /// Host state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// The cluster tool failed or timed out.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl CoreError {
    /// Coarse classification used for HTTP status mapping and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::AlreadyExists(_) | CoreError::CreateInProgress(_) => ErrorKind::Conflict,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Protected(_) => ErrorKind::Forbidden,
            CoreError::State(StateError::Corrupt { .. }) => ErrorKind::StateCorrupt,
            CoreError::State(_) => ErrorKind::Io,
            CoreError::Tool(err) if err.is_timeout() => ErrorKind::ToolTimeout,
            CoreError::Tool(_) => ErrorKind::Tool,
        }
    }
}

/// Error kinds exposed to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StateCorrupt,
    Io,
    Conflict,
    NotFound,
    Forbidden,
    Tool,
    ToolTimeout,
    InvalidRequest,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StateCorrupt => "state_corrupt",
            ErrorKind::Io => "io",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Tool => "tool",
            ErrorKind::ToolTimeout => "tool_timeout",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
