//! Uniform request/response wrapper around one language-model backend.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::prompt::KICKOFF_MESSAGE;
use crate::error::BackendError;
use crate::llm::{ChatMessage, ChatResponse, CompletionOptions, LlmClient, ToolCall};
use crate::message::{AgentRole, Message, ToolCallRef, Usage};
use crate::tools::ToolDescriptor;

/// Tool output handed back to the model is cut to this many characters.
const MAX_TOOL_CONTEXT_CHARS: usize = 12_000;

/// Tool outcomes rendered as text are summarized to this many characters each.
const MAX_PEER_RESULT_CHARS: usize = 1_500;

/// One agent: a backend, a model, an immutable system prompt and the set of
/// tools it may call. Stateless between calls.
pub struct AgentProxy {
    role: AgentRole,
    name: String,
    system_prompt: Arc<str>,
    llm: Arc<dyn LlmClient>,
    model: String,
    options: CompletionOptions,
    capabilities: HashSet<String>,
}

impl AgentProxy {
    pub fn new(
        role: AgentRole,
        name: impl Into<String>,
        system_prompt: impl Into<Arc<str>>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            role,
            name: name.into(),
            system_prompt: system_prompt.into(),
            llm,
            model: model.into(),
            options: CompletionOptions::default(),
            capabilities: HashSet::new(),
        }
    }

    /// Allow this agent to call the named tools.
    pub fn with_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature;
        self
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn can_use(&self, tool_name: &str) -> bool {
        self.capabilities.contains(tool_name)
    }

    /// Produce the next message given the shared history and the tools on
    /// offer. Tool calls come back `Pending`; the driver resolves them.
    pub async fn generate(
        &self,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, BackendError> {
        let definitions: Vec<_> = tools
            .iter()
            .filter(|t| self.can_use(&t.name))
            .map(ToolDescriptor::definition)
            .collect();
        let context = self.build_context(history);

        debug!(
            role = %self.role,
            model = %self.model,
            context_messages = context.len(),
            tools = definitions.len(),
            "Generating message"
        );

        let response = self
            .llm
            .chat_completion(
                &self.model,
                &context,
                if definitions.is_empty() {
                    None
                } else {
                    Some(definitions.as_slice())
                },
                self.options,
            )
            .await
            .map_err(|e| BackendError::from_client(self.role, &e))?;

        self.to_message(response)
    }

    fn to_message(&self, response: ChatResponse) -> Result<Message, BackendError> {
        let terminated = matches!(
            response.finish_reason.as_deref(),
            Some("length") | Some("content_filter")
        );

        let mut tool_calls = Vec::new();
        for call in response.tool_calls.unwrap_or_default() {
            let name = call.function.name.trim();
            if name.is_empty() {
                return Err(BackendError::malformed(self.role, "tool call without a function name"));
            }
            let id = if call.id.trim().is_empty() {
                format!("call_{}", Uuid::new_v4().simple())
            } else {
                call.id.clone()
            };
            tool_calls.push(ToolCallRef::pending(
                id,
                name,
                parse_arguments(&call.function.arguments),
            ));
        }

        let content = response.content.unwrap_or_default();
        if content.trim().is_empty() && tool_calls.is_empty() && !terminated {
            return Err(BackendError::malformed(self.role, "backend returned an empty message"));
        }

        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(Message::new(self.role, content)
            .with_tool_calls(tool_calls)
            .with_terminated(terminated)
            .with_usage(usage))
    }

    /// Render the history from this agent's point of view: its own turns are
    /// `assistant` messages followed by their tool results, the peer's turns
    /// are `user` messages.
    fn build_context(&self, history: &[Message]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt.as_ref())];
        if self.role == AgentRole::Initiator {
            messages.push(ChatMessage::user(KICKOFF_MESSAGE));
        }

        for msg in history {
            if msg.role == self.role && self.capabilities.is_empty() {
                // Without tools on offer, replayed calls would be rejected.
                messages.push(ChatMessage::assistant(render_with_results(msg), Vec::new()));
            } else if msg.role == self.role {
                let calls = msg
                    .tool_calls
                    .iter()
                    .map(|c| ToolCall::function(&c.id, &c.tool_name, c.arguments.to_string()))
                    .collect();
                messages.push(ChatMessage::assistant(msg.content.clone(), calls));
                for call in &msg.tool_calls {
                    let output = match &call.result {
                        Some(result) => result.to_context_string(),
                        None => "Error: tool call was never resolved".to_string(),
                    };
                    messages.push(ChatMessage::tool(
                        &call.id,
                        truncate(&output, MAX_TOOL_CONTEXT_CHARS),
                    ));
                }
            } else if msg.role == AgentRole::System {
                messages.push(ChatMessage::system(msg.content.clone()));
            } else {
                messages.push(ChatMessage::user(render_with_results(msg)));
            }
        }

        messages
    }
}

/// A message's text plus a short account of the tools it ran.
fn render_with_results(msg: &Message) -> String {
    if msg.tool_calls.is_empty() {
        return msg.content.clone();
    }

    let mut text = msg.content.clone();
    text.push_str("\n\n[Tool results]");
    for call in &msg.tool_calls {
        let outcome = match &call.result {
            Some(result) => truncate(&result.to_context_string(), MAX_PEER_RESULT_CHARS),
            None => "unresolved".to_string(),
        };
        text.push_str(&format!("\n- {}({}): {}", call.tool_name, call.arguments, outcome));
    }
    text
}

/// Arguments arrive as a JSON string. Anything that is not a JSON object is
/// kept verbatim under `_raw` so the tool can report it as invalid.
fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "_raw": raw }),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
