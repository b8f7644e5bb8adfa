//! # CryoET Scout
//!
//! A two-agent research society that searches the CryoET Data Portal for
//! protein tomograms.
//!
//! This library provides:
//! - A turn-based conversation driver with tool dispatch and termination detection
//! - Data-portal and browser tools behind a uniform tool registry
//! - Integration with OpenRouter (or any OpenAI-compatible endpoint) for LLM access
//!
//! ## Architecture
//!
//! A "Researcher" (initiator) and an "Assistant" (executor) take turns:
//! 1. The initiator opens the session with an instruction
//! 2. The executor answers, calling tools whose results are folded into its message
//! 3. Agents alternate until one signals completion, says the completion
//!    phrase, or the turn ceiling is reached
//! 4. The history is summarized into a final answer
//!
//! ## Example
//!
//! ```rust,ignore
//! use cryoet_scout::conversation::{ConversationDriver, DriverConfig, ResultAggregator, Session};
//!
//! let session = Session::new(task_prompt, initiator, executor);
//! let mut driver = ConversationDriver::new(session, registry, DriverConfig::from(&config));
//! driver.run(&cancel).await?;
//! println!("{}", ResultAggregator::default().summarize_session(driver.session()));
//! ```

pub mod agent;
pub mod browser;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod message;
pub mod portal;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::Config;
