//! Turn-based driver: alternates the two agents, resolves their tool calls and
//! stops when the termination detector says so.

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::DriverEvent;
use super::session::{Completion, Session};
use super::termination::{TerminationDetector, TerminationReason, Verdict};
use crate::config::{Config, DEFAULT_MAX_STEPS, DEFAULT_SENTINEL};
use crate::error::DriverError;
use crate::message::{AgentRole, Message, ToolCallRef, ToolResult};
use crate::tools::{cancelled_result, DispatchOptions, ToolEffect, ToolRegistry};

/// Loop bounds for one session.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Turn ceiling; the opening message is not a turn.
    pub max_steps: usize,
    pub generate_timeout: Duration,
    pub tool_timeout: Duration,
    /// Extra attempts for read-only tools.
    pub tool_retries: u32,
    pub parallel_tool_dispatch: bool,
    pub termination_sentinel: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            generate_timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(300),
            tool_retries: 1,
            parallel_tool_dispatch: false,
            termination_sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

impl From<&Config> for DriverConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_steps: config.max_steps,
            generate_timeout: config.generate_timeout,
            tool_timeout: config.tool_timeout,
            tool_retries: config.tool_retries,
            parallel_tool_dispatch: config.parallel_tool_dispatch,
            termination_sentinel: config.termination_sentinel.clone(),
        }
    }
}

/// Owns the session and the tool registry for the length of one run.
pub struct ConversationDriver {
    session: Session,
    registry: ToolRegistry,
    detector: TerminationDetector,
    config: DriverConfig,
    events: Option<mpsc::UnboundedSender<DriverEvent>>,
}

impl ConversationDriver {
    pub fn new(session: Session, registry: ToolRegistry, mut config: DriverConfig) -> Self {
        config.max_steps = config.max_steps.max(1);
        let detector = TerminationDetector::new(&config.termination_sentinel, config.max_steps);
        Self {
            session,
            registry,
            detector,
            config,
            events: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &TerminationDetector {
        &self.detector
    }

    /// Run the session to `Done`.
    ///
    /// On error the session is left in `Done(Aborted)` with its partial
    /// history intact.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Completion, DriverError> {
        if let Some(completion) = self.session.completion() {
            return Ok(completion);
        }

        info!(
            max_steps = self.config.max_steps,
            tools = self.registry.len(),
            initiator = %self.session.initiator().name(),
            executor = %self.session.executor().name(),
            "Starting session"
        );

        match self.drive(cancel).await {
            Ok(completion) => {
                self.session.finish(completion);
                info!(
                    ?completion,
                    messages = self.session.history().len(),
                    "Session finished"
                );
                self.emit(DriverEvent::Finished(completion));
                Ok(completion)
            }
            Err(err) => {
                error!(
                    error = %err,
                    messages = self.session.history().len(),
                    "Session aborted"
                );
                self.session.record_failure(err.to_string());
                self.session.finish(Completion::Aborted);
                self.emit(DriverEvent::Finished(Completion::Aborted));
                Err(err)
            }
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<Completion, DriverError> {
        if self.session.history().is_empty() {
            ensure_live(cancel)?;
            self.take_turn(AgentRole::Initiator, cancel).await?;
        }

        let mut role = self
            .session
            .history()
            .last()
            .map(|m| m.role.peer())
            .unwrap_or(AgentRole::Executor);

        loop {
            self.session.enter_turn(role);
            ensure_live(cancel)?;
            self.take_turn(role, cancel).await?;

            match self.detector.evaluate(self.session.history()) {
                Verdict::Continue => role = role.peer(),
                Verdict::Terminate(TerminationReason::StepCeiling) => {
                    warn!(
                        max_steps = self.config.max_steps,
                        "Step ceiling reached without completion"
                    );
                    return Ok(Completion::MaxStepsExceeded);
                }
                Verdict::Terminate(reason) => {
                    debug!(?reason, "Termination detected");
                    return Ok(Completion::Terminated(reason));
                }
            }
        }
    }

    /// Generate one message for `role`, resolve its tool calls and append it.
    async fn take_turn(&mut self, role: AgentRole, cancel: &CancellationToken) -> Result<(), DriverError> {
        let after = self.config.generate_timeout;
        let generated = {
            let agent = self.session.agent(role);
            let generation = tokio::time::timeout(
                after,
                agent.generate(self.session.history(), self.registry.descriptors()),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DriverError::Cancelled),
                outcome = generation => outcome,
            }
        };
        let mut message = match generated {
            Ok(result) => result?,
            Err(_) => return Err(DriverError::Timeout { role, after }),
        };

        self.resolve_tool_calls(role, &mut message, cancel).await;

        self.session.append(message);
        let history = self.session.history();
        if let Some(appended) = history.last() {
            info!(
                step = TerminationDetector::steps(history),
                role = %role,
                tool_calls = appended.tool_calls.len(),
                failed_tools = appended.failed_tool_count(),
                tokens = appended.usage.total_tokens,
                "Turn complete"
            );
            if self.events.is_some() {
                self.emit(DriverEvent::MessageAppended(appended.clone()));
            }
        }
        Ok(())
    }

    /// Bring every pending call of `message` to a terminal status, in
    /// emission order.
    async fn resolve_tool_calls(
        &self,
        role: AgentRole,
        message: &mut Message,
        cancel: &CancellationToken,
    ) {
        if message.tool_calls.is_empty() {
            return;
        }

        let options = DispatchOptions {
            timeout: Some(self.config.tool_timeout),
            retries: self.config.tool_retries,
            cancel: Some(cancel.clone()),
            ..Default::default()
        };

        if self.config.parallel_tool_dispatch && self.can_run_concurrently(&message.tool_calls) {
            debug!(calls = message.tool_calls.len(), "Dispatching tool calls concurrently");
            let results = join_all(
                message
                    .tool_calls
                    .iter()
                    .map(|call| self.dispatch_one(role, call, &options)),
            )
            .await;
            for (call, result) in message.tool_calls.iter_mut().zip(results) {
                call.resolve(result);
            }
            return;
        }

        for call in message.tool_calls.iter_mut() {
            if cancel.is_cancelled() {
                debug!(tool = %call.tool_name, "Skipping tool call after cancellation");
                call.resolve(cancelled_result());
                continue;
            }
            let result = self.dispatch_one(role, call, &options).await;
            call.resolve(result);
        }
    }

    async fn dispatch_one(
        &self,
        role: AgentRole,
        call: &ToolCallRef,
        options: &DispatchOptions,
    ) -> ToolResult {
        self.emit(DriverEvent::ToolStarted {
            role,
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        });

        let result = if self.session.agent(role).can_use(&call.tool_name) {
            self.registry.dispatch_with(&call.request(), options).await
        } else {
            warn!(role = %role, tool = %call.tool_name, "Agent called a tool outside its capability set");
            ToolResult::unknown_tool()
        };

        debug!(
            tool = %call.tool_name,
            success = result.is_success(),
            error_kind = ?result.error_kind,
            "Tool call resolved"
        );
        self.emit(DriverEvent::ToolFinished {
            role,
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            result: result.clone(),
        });
        result
    }

    /// Concurrent dispatch is allowed only for read-only tools that do not
    /// share a resource.
    fn can_run_concurrently(&self, calls: &[ToolCallRef]) -> bool {
        if calls.len() < 2 {
            return false;
        }
        let mut resources = HashSet::new();
        calls.iter().all(|call| match self.registry.get(&call.tool_name) {
            Some(descriptor) => {
                descriptor.effect == ToolEffect::ReadOnly
                    && descriptor.resource.map_or(true, |r| resources.insert(r))
            }
            None => true,
        })
    }

    fn emit(&self, event: DriverEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), DriverError> {
    if cancel.is_cancelled() {
        return Err(DriverError::Cancelled);
    }
    Ok(())
}
