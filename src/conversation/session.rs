//! Session state: the two agents, the shared history and the driver state.

use serde::Serialize;
use tracing::warn;

use super::termination::TerminationReason;
use crate::agent::AgentProxy;
use crate::message::{AgentRole, Message};

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Closed naturally (agent flag or sentinel).
    Terminated(TerminationReason),
    /// Hit the turn ceiling without closing naturally.
    MaxStepsExceeded,
    /// A driver error stopped the loop.
    Aborted,
}

/// Driver position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Turn(AgentRole),
    Done(Completion),
}

/// One run of the research society. Only the driver appends to the history.
pub struct Session {
    task_prompt: String,
    initiator: AgentProxy,
    executor: AgentProxy,
    history: Vec<Message>,
    state: SessionState,
    failure: Option<String>,
}

impl Session {
    pub fn new(task_prompt: impl Into<String>, initiator: AgentProxy, executor: AgentProxy) -> Self {
        Self {
            task_prompt: task_prompt.into(),
            initiator,
            executor,
            history: Vec::new(),
            state: SessionState::Init,
            failure: None,
        }
    }

    pub fn task_prompt(&self) -> &str {
        &self.task_prompt
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn completion(&self) -> Option<Completion> {
        match self.state {
            SessionState::Done(completion) => Some(completion),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Done(_))
    }

    /// Error text of an aborted run.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn initiator(&self) -> &AgentProxy {
        &self.initiator
    }

    pub fn executor(&self) -> &AgentProxy {
        &self.executor
    }

    /// The agent that speaks for `role`. System turns are never generated.
    pub(crate) fn agent(&self, role: AgentRole) -> &AgentProxy {
        match role {
            AgentRole::Executor => &self.executor,
            AgentRole::Initiator | AgentRole::System => &self.initiator,
        }
    }

    /// Append a completed message, assigning its sequence number.
    pub(crate) fn append(&mut self, mut message: Message) {
        debug_assert!(message.is_complete(), "appended message has pending tool calls");
        message.sequence = self.history.len() as u64;
        self.history.push(message);
    }

    pub(crate) fn enter_turn(&mut self, role: AgentRole) {
        if !self.is_terminated() {
            self.state = SessionState::Turn(role);
        }
    }

    /// Move to `Done`. Returns false if the session had already finished.
    pub(crate) fn finish(&mut self, completion: Completion) -> bool {
        if let SessionState::Done(existing) = self.state {
            warn!(?existing, ?completion, "Session already finished");
            return false;
        }
        self.state = SessionState::Done(completion);
        true
    }

    pub(crate) fn record_failure(&mut self, failure: String) {
        self.failure = Some(failure);
    }
}
