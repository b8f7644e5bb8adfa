use serde_json::Value;

use super::session::Completion;
use crate::message::{AgentRole, Message, ToolResult};

/// Progress events emitted by the driver while a session runs.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A completed message was appended to the history.
    MessageAppended(Message),
    /// A tool call is about to be dispatched.
    ToolStarted {
        role: AgentRole,
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    /// A tool call reached its terminal result.
    ToolFinished {
        role: AgentRole,
        call_id: String,
        tool_name: String,
        result: ToolResult,
    },
    /// The session reached `Done`.
    Finished(Completion),
}
