//! Tool registry and dispatch.
//!
//! Every tool invocation yields exactly one [`ToolResult`]. Failures inside a
//! tool (errors, timeouts, cancellation, panics) are captured into the
//! `Error` variant and never cross the dispatch boundary, so a failing browser
//! action or network call cannot abort the conversation.

mod browser;
mod portal;

pub use browser::{browser_tools, BrowserTool};
pub use portal::{portal_tools, DownloadArtifact, GetDetails, SearchRecords};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DuplicateToolError, ToolError, ToolErrorKind};
use crate::llm::ToolDefinition;
use crate::message::{ToolCallRequest, ToolResult};

/// Whether repeating a call is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    /// Idempotent lookups (search, detail fetch); safe to retry.
    ReadOnly,
    /// Changes state outside the session (download, click); never retried.
    Write,
}

/// A capability an agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool.
    fn name(&self) -> &str;

    /// Description for the LLM prompt.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    /// Exclusive resource the tool drives, if any. Two calls that share a
    /// resource are never in flight at the same time.
    fn resource(&self) -> Option<&'static str> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Registered tool: its advertised contract plus the capability behind it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub effect: ToolEffect,
    pub resource: Option<&'static str>,
    pub invoke: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
            effect: tool.effect(),
            resource: tool.resource(),
            invoke: tool,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.input_schema.clone())
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("effect", &self.effect)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Per-call dispatch bounds.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub timeout: Option<Duration>,
    /// Extra attempts for `ReadOnly` tools. `Write` tools always run once.
    pub retries: u32,
    pub retry_backoff: Duration,
    pub cancel: Option<CancellationToken>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 0,
            retry_backoff: Duration::from_millis(500),
            cancel: None,
        }
    }
}

/// Registry of available tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), DuplicateToolError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(DuplicateToolError(descriptor.name));
        }
        debug!(tool = %descriptor.name, effect = ?descriptor.effect, "Registered tool");
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), DuplicateToolError> {
        self.register(ToolDescriptor::from_tool(tool))
    }

    pub fn register_all(
        &mut self,
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    ) -> Result<(), DuplicateToolError> {
        for tool in tools {
            self.register_tool(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Function schemas for the named tools, skipping names not registered.
    pub fn tool_definitions(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.get(name))
            .map(ToolDescriptor::definition)
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch without bounds.
    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        self.dispatch_with(call, &DispatchOptions::default()).await
    }

    /// Dispatch a call. Never fails: every outcome is a terminal `ToolResult`.
    pub async fn dispatch_with(
        &self,
        call: &ToolCallRequest,
        options: &DispatchOptions,
    ) -> ToolResult {
        let Some(descriptor) = self.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Dispatch to unknown tool");
            return ToolResult::unknown_tool();
        };

        let attempts = match descriptor.effect {
            ToolEffect::ReadOnly => options.retries + 1,
            ToolEffect::Write => 1,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = invoke_once(descriptor, &call.arguments, options).await;
            if result.is_success() || attempt >= attempts || !is_retryable(&result) {
                return result;
            }

            let delay = options.retry_backoff * attempt;
            warn!(
                tool = %descriptor.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = result.error_message.as_deref().unwrap_or(""),
                "Retrying read-only tool"
            );
            match &options.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return cancelled_result(),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

async fn invoke_once(
    descriptor: &ToolDescriptor,
    args: &Value,
    options: &DispatchOptions,
) -> ToolResult {
    let execution = AssertUnwindSafe(descriptor.invoke.execute(args.clone())).catch_unwind();

    let bounded = async {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| limit),
            None => Ok(execution.await),
        }
    };

    let outcome = match &options.cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled_result(),
                outcome = bounded => outcome,
            }
        }
        None => bounded.await,
    };

    match outcome {
        Err(limit) => ToolResult::error(
            ToolErrorKind::Timeout,
            format!("{} timed out after {:?}", descriptor.name, limit),
        ),
        Ok(Err(panic)) => ToolResult::error(
            ToolErrorKind::Failed,
            format!("{} panicked: {}", descriptor.name, panic_message(&panic)),
        ),
        Ok(Ok(Ok(payload))) => ToolResult::success(payload),
        Ok(Ok(Err(err))) => {
            debug!(tool = %descriptor.name, error = %err, "Tool returned an error");
            ToolResult::error(ToolErrorKind::classify(&err), format!("{:#}", err))
        }
    }
}

pub(crate) fn cancelled_result() -> ToolResult {
    ToolResult::error(ToolErrorKind::Cancelled, "cancelled")
}

fn is_retryable(result: &ToolResult) -> bool {
    matches!(
        result.error_kind,
        Some(ToolErrorKind::Failed) | Some(ToolErrorKind::Timeout)
    )
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{}' argument", key)).into())
}

/// Read a string or number argument as an id string.
pub(crate) fn required_id(args: &Value, key: &str) -> anyhow::Result<String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ToolError::InvalidArguments(format!("missing '{}' argument", key)).into()),
    }
}

/// Read an optional numeric argument, accepting numeric strings.
pub(crate) fn optional_f64(args: &Value, key: &str) -> anyhow::Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            ToolError::InvalidArguments(format!("'{}' must be a number, got '{}'", key, s)).into()
        }),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{}' must be a number, got {}",
            key, other
        ))
        .into()),
    }
}
