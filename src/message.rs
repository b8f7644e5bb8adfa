//! Session data model: messages, tool-call references and tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolErrorKind;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Initiator,
    Executor,
    System,
}

impl AgentRole {
    /// The agent that speaks after this one.
    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Executor,
            Self::Executor => Self::Initiator,
            Self::System => Self::Initiator,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Executor => write!(f, "executor"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Lifecycle of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Success,
    Error,
}

/// Terminal outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Envelope returned by every tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolResultStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        Self {
            status: ToolResultStatus::Success,
            payload,
            error_message: None,
            error_kind: None,
        }
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: ToolResultStatus::Error,
            payload: Value::Null,
            error_message: Some(message.into()),
            error_kind: Some(kind),
        }
    }

    pub fn unknown_tool() -> Self {
        Self::error(ToolErrorKind::UnknownTool, "unknown tool")
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolResultStatus::Success
    }

    /// Text form handed back to the language model.
    pub fn to_context_string(&self) -> String {
        match self.status {
            ToolResultStatus::Success => match &self.payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolResultStatus::Error => format!(
                "Error ({}): {}",
                self.error_kind
                    .map(|k| format!("{:?}", k))
                    .unwrap_or_else(|| "Failed".to_string()),
                self.error_message.as_deref().unwrap_or("tool failed")
            ),
        }
    }
}

/// A tool call emitted by an agent, resolved in place by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    /// Backend-assigned call id, used to correlate the result.
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub result: Option<ToolResult>,
}

impl ToolCallRef {
    pub fn pending(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ToolCallStatus::Pending
    }

    /// Record the terminal result of this call.
    pub fn resolve(&mut self, result: ToolResult) {
        self.status = match result.status {
            ToolResultStatus::Success => ToolCallStatus::Success,
            ToolResultStatus::Error => ToolCallStatus::Error,
        };
        self.result = Some(result);
    }

    /// The request handed to the registry.
    pub fn request(&self) -> ToolCallRequest {
        ToolCallRequest {
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// A `{toolName, arguments}` pair to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Token accounting reported by the backend for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One entry of the session history.
///
/// Optional backend fields are present-with-default: `content` is empty,
/// `terminated` is false and `usage` is zero when the backend omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: AgentRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default)]
    pub terminated: bool,
    /// Position in the history; assigned when the message is appended.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            terminated: false,
            sequence: 0,
            usage: Usage::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRef>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_terminated(mut self, terminated: bool) -> Self {
        self.terminated = terminated;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Every tool call has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.tool_calls.iter().all(|c| !c.is_pending())
    }

    pub fn failed_tool_count(&self) -> usize {
        self.tool_calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Error)
            .count()
    }

    /// `[role] content` line for progress output.
    pub fn display_line(&self) -> String {
        let mut line = format!("[{}] {}", self.role, self.content.trim());
        for call in &self.tool_calls {
            let outcome = match call.status {
                ToolCallStatus::Pending => "pending".to_string(),
                ToolCallStatus::Success => "ok".to_string(),
                ToolCallStatus::Error => call
                    .result
                    .as_ref()
                    .and_then(|r| r.error_message.clone())
                    .unwrap_or_else(|| "error".to_string()),
            };
            line.push_str(&format!("\n  -> {}({}) {}", call.tool_name, call.arguments, outcome));
        }
        line
    }
}
