//! Completion detection, evaluated after every turn.

use serde::Serialize;

use crate::message::Message;

/// Why a session was judged complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The agent's backend reported it could not continue.
    AgentSignalled,
    /// The message contained the completion phrase.
    Sentinel,
    /// The turn ceiling was reached.
    StepCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Terminate(TerminationReason),
}

impl Verdict {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminate(_))
    }
}

/// Decides whether the history is complete by looking at its latest message
/// and its length.
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    sentinel: String,
    max_steps: usize,
}

impl TerminationDetector {
    /// A ceiling of zero is raised to one.
    pub fn new(sentinel: impl Into<String>, max_steps: usize) -> Self {
        Self {
            sentinel: sentinel.into(),
            max_steps: max_steps.max(1),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Turns taken so far. The opening message is not a turn.
    pub fn steps(history: &[Message]) -> usize {
        history.len().saturating_sub(1)
    }

    pub fn check(&self, history: &[Message]) -> bool {
        self.evaluate(history).is_terminal()
    }

    /// Natural closure wins over the ceiling when both hold.
    pub fn evaluate(&self, history: &[Message]) -> Verdict {
        let Some(last) = history.last() else {
            return Verdict::Continue;
        };

        if last.terminated {
            return Verdict::Terminate(TerminationReason::AgentSignalled);
        }
        if self.contains_sentinel(&last.content) {
            return Verdict::Terminate(TerminationReason::Sentinel);
        }
        if Self::steps(history) >= self.max_steps {
            return Verdict::Terminate(TerminationReason::StepCeiling);
        }
        Verdict::Continue
    }

    pub fn contains_sentinel(&self, content: &str) -> bool {
        !self.sentinel.is_empty() && content.contains(&self.sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SENTINEL;
    use crate::message::AgentRole;

    fn history(contents: &[&str]) -> Vec<Message> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let role = if i % 2 == 0 { AgentRole::Initiator } else { AgentRole::Executor };
                Message::new(role, *c)
            })
            .collect()
    }

    #[test]
    fn empty_history_is_never_terminal() {
        let detector = TerminationDetector::new(DEFAULT_SENTINEL, 1);
        assert_eq!(detector.evaluate(&[]), Verdict::Continue);
        assert!(!detector.check(&[]));
    }

    #[test]
    fn terminated_flag_ends_session() {
        let detector = TerminationDetector::new(DEFAULT_SENTINEL, 30);
        let mut h = history(&["Instruction: search", "Solution: ..."]);
        h[1].terminated = true;
        assert_eq!(
            detector.evaluate(&h),
            Verdict::Terminate(TerminationReason::AgentSignalled)
        );
    }

    #[test]
    fn sentinel_ends_session() {
        let detector = TerminationDetector::new(DEFAULT_SENTINEL, 30);
        let h = history(&["Instruction: search", "Solution: done", "CAMEL_TASK_DONE"]);
        assert_eq!(detector.evaluate(&h), Verdict::Terminate(TerminationReason::Sentinel));

        let h = history(&["Instruction: search", "Solution: camel_task_done is near"]);
        assert_eq!(detector.evaluate(&h), Verdict::Continue);
    }

    #[test]
    fn ceiling_counts_turns_after_opening() {
        let detector = TerminationDetector::new(DEFAULT_SENTINEL, 3);
        assert!(!detector.check(&history(&["a", "b", "c"])));
        assert_eq!(
            detector.evaluate(&history(&["a", "b", "c", "d"])),
            Verdict::Terminate(TerminationReason::StepCeiling)
        );
    }

    #[test]
    fn natural_close_wins_on_last_step() {
        let detector = TerminationDetector::new(DEFAULT_SENTINEL, 1);
        let h = history(&["Instruction: search", "Solution: CAMEL_TASK_DONE"]);
        assert_eq!(detector.evaluate(&h), Verdict::Terminate(TerminationReason::Sentinel));
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        assert_eq!(TerminationDetector::new(DEFAULT_SENTINEL, 0).max_steps(), 1);
    }
}
