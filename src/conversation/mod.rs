//! Conversation module - the turn-based exchange between the two agents.
//!
//! The driver follows a simple state machine:
//! 1. `Init`: the initiator opens the session
//! 2. `Turn(role)`: the agent generates, its tool calls are dispatched and the
//!    results folded into the message, which is appended to the history
//! 3. After each turn the termination detector decides whether to stop
//! 4. `Done`: the aggregator turns the history into the final answer

mod driver;
mod events;
mod session;
mod summary;
mod termination;

pub use driver::{ConversationDriver, DriverConfig};
pub use events::DriverEvent;
pub use session::{Completion, Session, SessionState};
pub use summary::{FinalAnswer, ResultAggregator, NO_RESPONSE};
pub use termination::{TerminationDetector, TerminationReason, Verdict};
