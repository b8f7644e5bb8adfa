//! Error taxonomy for a research session.
//!
//! Tool-level failures never appear here as propagated errors: they are
//! captured into a [`ToolResult`](crate::message::ToolResult) and folded into
//! the history so the agents can react. Only driver-level failures abort a
//! session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::AgentRole;

/// Why an agent backend failed to produce a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Backend unreachable or returned a non-success status
    Transport,
    /// Backend answered but the output could not be turned into a message
    Malformed,
}

impl BackendErrorKind {
    /// Classify an error raised by an [`LlmClient`](crate::llm::LlmClient).
    /// Anything the client did not mark as malformed output is transport.
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<LlmError>() {
            Some(LlmError::Malformed(_)) => Self::Malformed,
            Some(LlmError::Transport(_)) | None => Self::Transport,
        }
    }
}

/// Errors a chat backend client raises.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Request failed, or the backend answered with a non-success status
    #[error("{0}")]
    Transport(String),

    /// Backend answered but the body is unusable
    #[error("{0}")]
    Malformed(String),
}

/// Agent generation failed.
#[derive(Debug, Error)]
#[error("{role} backend failed ({kind:?}): {message}")]
pub struct BackendError {
    pub role: AgentRole,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    /// Wrap a client failure, keeping its kind.
    pub fn from_client(role: AgentRole, err: &anyhow::Error) -> Self {
        Self {
            role,
            kind: BackendErrorKind::classify(err),
            message: format!("{:#}", err),
        }
    }

    pub fn malformed(role: AgentRole, message: impl Into<String>) -> Self {
        Self {
            role,
            kind: BackendErrorKind::Malformed,
            message: message.into(),
        }
    }
}

/// Errors that abort the session loop. The partial history is kept in the
/// session.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{role} did not respond within {after:?}")]
    Timeout { role: AgentRole, after: Duration },

    #[error("session cancelled")]
    Cancelled,
}

/// A tool with this name is already registered.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("tool already registered: {0}")]
pub struct DuplicateToolError(pub String);

/// Errors a tool implementation raises to classify its failure. Anything else
/// is reported as [`ToolErrorKind::Failed`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Structured kind of a failed tool invocation, kept on the result instead of
/// collapsing the failure to free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArguments,
    NotFound,
    Failed,
    Timeout,
    Cancelled,
}

impl ToolErrorKind {
    /// Classify an error raised by a tool implementation.
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ToolError>() {
            Some(ToolError::InvalidArguments(_)) => Self::InvalidArguments,
            Some(ToolError::NotFound(_)) => Self::NotFound,
            None => Self::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_keeps_tool_error_kind() {
        let err = anyhow::Error::new(ToolError::InvalidArguments("missing 'query'".into()));
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::InvalidArguments);

        let err = anyhow::Error::new(ToolError::NotFound("dataset 7".into()));
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::NotFound);
    }

    #[test]
    fn classify_defaults_to_failed() {
        let err = anyhow::anyhow!("connection reset");
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::Failed);
    }

    #[test]
    fn backend_kind_follows_client_error() {
        let err = anyhow::Error::new(LlmError::Malformed("backend returned no choices".into()));
        assert_eq!(BackendErrorKind::classify(&err), BackendErrorKind::Malformed);

        let err = anyhow::Error::new(LlmError::Transport("connection refused".into()));
        assert_eq!(BackendErrorKind::classify(&err), BackendErrorKind::Transport);

        let err = anyhow::anyhow!("script exhausted");
        assert_eq!(BackendErrorKind::classify(&err), BackendErrorKind::Transport);

        let backend = BackendError::from_client(
            AgentRole::Executor,
            &anyhow::Error::new(LlmError::Malformed("not json".into())),
        );
        assert_eq!(backend.kind, BackendErrorKind::Malformed);
        assert_eq!(backend.message, "not json");
    }

    #[test]
    fn classify_sees_through_context() {
        let err = anyhow::Error::new(ToolError::NotFound("tomogram 3".into()))
            .context("download_artifact");
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::NotFound);
    }
}
