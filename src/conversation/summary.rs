//! Final answer assembly.

use std::fmt;

use serde::Serialize;

use super::session::{Completion, Session};
use crate::config::DEFAULT_SENTINEL;
use crate::message::{AgentRole, Message};

/// Text reported when no agent produced any content.
pub const NO_RESPONSE: &str = "No response generated";

/// Summarized outcome of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalAnswer {
    pub text: String,
    pub message_count: usize,
    pub tool_invocation_count: usize,
    pub failed_tool_count: usize,
    pub total_tokens: u64,
    pub max_steps_exceeded: bool,
    pub failure: Option<String>,
}

/// Collapses a history into a [`FinalAnswer`]. Never fails.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    sentinel: String,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl ResultAggregator {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// The answer text is the latest agent content that is not empty once the
    /// completion phrase is removed, so a bare closing message defers to the
    /// report before it.
    pub fn summarize(&self, history: &[Message]) -> FinalAnswer {
        let text = history
            .iter()
            .rev()
            .filter(|m| matches!(m.role, AgentRole::Executor | AgentRole::Initiator))
            .map(|m| self.strip_sentinel(&m.content))
            .find(|content| !content.is_empty())
            .unwrap_or_else(|| NO_RESPONSE.to_string());

        FinalAnswer {
            text,
            message_count: history.len(),
            tool_invocation_count: history.iter().map(|m| m.tool_calls.len()).sum(),
            failed_tool_count: history.iter().map(Message::failed_tool_count).sum(),
            total_tokens: history.iter().map(|m| m.usage.total_tokens).sum(),
            max_steps_exceeded: false,
            failure: None,
        }
    }

    /// Like [`summarize`](Self::summarize), plus how the session ended.
    pub fn summarize_session(&self, session: &Session) -> FinalAnswer {
        let mut answer = self.summarize(session.history());
        match session.completion() {
            Some(Completion::MaxStepsExceeded) => answer.max_steps_exceeded = true,
            Some(Completion::Aborted) => {
                answer.failure = Some(
                    session
                        .failure()
                        .unwrap_or("session aborted")
                        .to_string(),
                );
            }
            _ => {}
        }
        answer
    }

    fn strip_sentinel(&self, content: &str) -> String {
        let stripped = if self.sentinel.is_empty() {
            content.to_string()
        } else {
            content.replace(&self.sentinel, "")
        };
        stripped.trim().to_string()
    }
}

impl fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Final Answer ===")?;
        writeln!(f, "{}", self.text)?;
        writeln!(f)?;
        write!(
            f,
            "Messages: {} | Tool calls: {} ({} failed) | Tokens: {}",
            self.message_count, self.tool_invocation_count, self.failed_tool_count, self.total_tokens
        )?;
        if self.max_steps_exceeded {
            write!(f, "\nStopped at the step ceiling before the task was marked done.")?;
        }
        if let Some(failure) = &self.failure {
            write!(f, "\nSession failed: {}", failure)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCallRef, ToolResult, Usage};
    use crate::error::ToolErrorKind;
    use serde_json::json;

    #[test]
    fn empty_history_yields_no_response() {
        let answer = ResultAggregator::default().summarize(&[]);
        assert_eq!(answer.text, NO_RESPONSE);
        assert_eq!(answer.message_count, 0);
        assert_eq!(answer.tool_invocation_count, 0);
    }

    #[test]
    fn bare_sentinel_defers_to_previous_report() {
        let history = vec![
            Message::new(AgentRole::Initiator, "Instruction: summarize"),
            Message::new(AgentRole::Executor, "Solution: 5 spike datasets found"),
            Message::new(AgentRole::Initiator, " CAMEL_TASK_DONE "),
        ];
        let answer = ResultAggregator::default().summarize(&history);
        assert_eq!(answer.text, "Solution: 5 spike datasets found");
    }

    #[test]
    fn trailing_sentinel_is_stripped() {
        let history = vec![Message::new(
            AgentRole::Executor,
            "Solution: summary written. CAMEL_TASK_DONE",
        )];
        let answer = ResultAggregator::default().summarize(&history);
        assert_eq!(answer.text, "Solution: summary written.");
    }

    #[test]
    fn counts_tools_and_tokens() {
        let mut executor = Message::new(AgentRole::Executor, "Solution: searched")
            .with_tool_calls(vec![
                ToolCallRef::pending("a", "search", json!({})),
                ToolCallRef::pending("b", "get_details", json!({})),
            ])
            .with_usage(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            });
        executor.tool_calls[0].resolve(ToolResult::success(json!({"count": 3})));
        executor.tool_calls[1].resolve(ToolResult::error(ToolErrorKind::NotFound, "dataset 9"));

        let history = vec![
            Message::new(AgentRole::Initiator, "Instruction: search").with_usage(Usage {
                prompt_tokens: 50,
                completion_tokens: 5,
                total_tokens: 55,
            }),
            executor,
        ];
        let answer = ResultAggregator::default().summarize(&history);
        assert_eq!(answer.tool_invocation_count, 2);
        assert_eq!(answer.failed_tool_count, 1);
        assert_eq!(answer.total_tokens, 175);
    }

    #[test]
    fn display_mentions_ceiling_and_failure() {
        let answer = FinalAnswer {
            text: "Solution: partial".to_string(),
            message_count: 31,
            tool_invocation_count: 4,
            failed_tool_count: 1,
            total_tokens: 9000,
            max_steps_exceeded: true,
            failure: Some("executor did not respond within 180s".to_string()),
        };
        let rendered = answer.to_string();
        assert!(rendered.starts_with("=== Final Answer ===\nSolution: partial"));
        assert!(rendered.contains("Tool calls: 4 (1 failed)"));
        assert!(rendered.contains("step ceiling"));
        assert!(rendered.contains("Session failed: executor did not respond"));
    }
}
