//! Agent module - the two role-playing agents of a research session.
//!
//! Each agent is an [`AgentProxy`]: a backend, a model, a fixed system prompt
//! and a tool capability set. The initiator gives instructions, the executor
//! carries them out with tools. Neither keeps state between calls; the shared
//! history lives in the session.

mod prompt;
mod proxy;

pub use prompt::{build_executor_prompt, build_initiator_prompt, build_task_prompt, KICKOFF_MESSAGE};
pub use proxy::AgentProxy;
