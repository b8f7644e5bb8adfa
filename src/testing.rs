//! Test doubles shared by the unit tests: a scripted chat backend, a
//! configurable tool, an in-memory portal, a recording browser and a local
//! HTTP server for the network clients.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::browser::{BrowserAction, BrowserEngine};
use crate::error::ToolError;
use crate::llm::{ChatMessage, ChatResponse, CompletionOptions, LlmClient, ToolCall, ToolDefinition};
use crate::portal::{
    artifact_file_name, DataPortal, RecordDetail, RecordSummary, SearchCriteria, TomogramInfo,
};
use crate::tools::{Tool, ToolEffect};

// ---------------------------------------------------------------------------
// Chat backend
// ---------------------------------------------------------------------------

pub(crate) fn reply(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: None,
        finish_reason: Some("stop".to_string()),
        usage: None,
    }
}

/// A reply carrying tool calls, given as `(name, json_arguments)` pairs.
pub(crate) fn reply_with_calls(text: &str, calls: &[(&str, &str)]) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: Some(
            calls
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall::function(format!("call_{}", i), *name, *args))
                .collect(),
        ),
        finish_reason: Some("tool_calls".to_string()),
        usage: None,
    }
}

pub(crate) enum Scripted {
    Reply(ChatResponse),
    Fail(String),
    Delayed(Duration, ChatResponse),
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Plays back a fixed script, then the fallback (if any) forever.
pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<ChatResponse>,
    fail_always: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::from_script(responses.into_iter().map(Scripted::Reply).collect())
    }

    pub fn from_script(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            fail_always: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: ChatResponse) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn failing(message: &str) -> Self {
        let mut llm = Self::new(Vec::new());
        llm.fail_always = Some(message.to_string());
        llm
    }

    pub fn with_fallback(mut self, response: ChatResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn request(&self, index: usize) -> RecordedRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        _options: CompletionOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.function.name.clone())
                .collect(),
        });

        if let Some(message) = &self.fail_always {
            anyhow::bail!("{}", message);
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => anyhow::bail!("{}", message),
            Some(Scripted::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("script exhausted")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

enum StubBehavior {
    Ok(Value),
    Fail(String),
    InvalidArgs(String),
    Panic,
}

/// A tool whose outcome is fixed at construction.
pub(crate) struct StubTool {
    name: String,
    behavior: StubBehavior,
    delay: Option<Duration>,
    effect: ToolEffect,
    calls: AtomicUsize,
}

impl StubTool {
    fn with_behavior(name: &str, behavior: StubBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: None,
            effect: ToolEffect::ReadOnly,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(name: &str, payload: Value) -> Self {
        Self::with_behavior(name, StubBehavior::Ok(payload))
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::with_behavior(name, StubBehavior::Fail(message.to_string()))
    }

    pub fn invalid_args(name: &str, message: &str) -> Self {
        Self::with_behavior(name, StubBehavior::InvalidArgs(message.to_string()))
    }

    pub fn panicking(name: &str) -> Self {
        Self::with_behavior(name, StubBehavior::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn effect(&self) -> ToolEffect {
        self.effect
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            StubBehavior::Ok(payload) => Ok(payload.clone()),
            StubBehavior::Fail(message) => anyhow::bail!("{}", message),
            StubBehavior::InvalidArgs(message) => {
                Err(ToolError::InvalidArguments(message.clone()).into())
            }
            StubBehavior::Panic => panic!("stub tool exploded"),
        }
    }
}

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

/// In-memory portal. Every dataset `<id>` has one tomogram `<id>-t0`.
#[derive(Default)]
pub(crate) struct FakePortal {
    datasets: Vec<RecordSummary>,
    last_criteria: Mutex<Option<SearchCriteria>>,
}

impl FakePortal {
    pub fn with_datasets(datasets: &[(&str, &str)]) -> Self {
        Self {
            datasets: datasets
                .iter()
                .map(|(id, name)| RecordSummary {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: format!("{} dataset", name),
                    authors: vec!["A. Author".to_string()],
                    release_date: Some("2024-01-01".to_string()),
                    runs_count: 2,
                })
                .collect(),
            last_criteria: Mutex::new(None),
        }
    }

    pub fn last_criteria(&self) -> Option<SearchCriteria> {
        self.last_criteria.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataPortal for FakePortal {
    async fn search(&self, criteria: &SearchCriteria) -> anyhow::Result<Vec<RecordSummary>> {
        *self.last_criteria.lock().unwrap() = Some(criteria.clone());
        let needle = criteria.query.to_lowercase();
        Ok(self
            .datasets
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .take(criteria.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_details(&self, record_id: &str) -> anyhow::Result<RecordDetail> {
        let summary = self
            .datasets
            .iter()
            .find(|d| d.id == record_id)
            .ok_or_else(|| ToolError::NotFound(format!("dataset {}", record_id)))?;
        Ok(RecordDetail {
            id: summary.id.clone(),
            name: summary.name.clone(),
            description: summary.description.clone(),
            authors: summary.authors.clone(),
            release_date: summary.release_date.clone(),
            tomograms: vec![TomogramInfo {
                id: format!("{}-t0", summary.id),
                name: format!("{} tomogram", summary.name),
                voxel_spacing: Some(4.0),
                download_url: Some(format!("https://files.example.org/{}.mrc", summary.id)),
            }],
        })
    }

    async fn download_artifact(
        &self,
        record_id: &str,
        artifact_id: &str,
        dest_dir: &Path,
    ) -> anyhow::Result<PathBuf> {
        let detail = self.get_details(record_id).await?;
        if detail.tomogram(artifact_id).is_none() {
            return Err(ToolError::NotFound(format!("tomogram {}", artifact_id)).into());
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(artifact_file_name(artifact_id));
        tokio::fs::write(&path, b"MRC").await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// Records every action and reports success.
#[derive(Default)]
pub(crate) struct RecordingBrowser {
    actions: Mutex<Vec<BrowserAction>>,
}

impl RecordingBrowser {
    pub fn actions(&self) -> Vec<BrowserAction> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserEngine for RecordingBrowser {
    async fn perform_action(&self, action: BrowserAction) -> anyhow::Result<Value> {
        let out = json!({ "ok": true, "action": serde_json::to_value(&action)? });
        self.actions.lock().unwrap().push(action);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// One request as seen by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub(crate) struct MockResponse {
    status: u16,
    body: Vec<u8>,
    /// Advertised length when it differs from the body, to cut a transfer short.
    declared_len: Option<usize>,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self::raw(status, body.to_string())
    }

    pub fn raw(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            declared_len: None,
        }
    }

    /// Sends `body` but advertises `declared_len` bytes, then hangs up.
    pub fn truncated(body: impl Into<Vec<u8>>, declared_len: usize) -> Self {
        Self {
            status: 200,
            body: body.into(),
            declared_len: Some(declared_len),
        }
    }
}

type Handler = dyn Fn(&HttpRequest, &str) -> MockResponse + Send + Sync;

/// A one-request-per-connection HTTP/1.1 server on an ephemeral local port.
/// The handler gets the request and the server's base url.
pub(crate) struct MockHttpServer {
    base_url: String,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, &str) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local test server");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let task = {
            let base_url = base_url.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let handler = handler.clone();
                    let requests = requests.clone();
                    let base_url = base_url.clone();
                    tokio::spawn(async move {
                        serve_connection(socket, handler, requests, base_url).await;
                    });
                }
            })
        };

        Self {
            base_url,
            requests,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    base_url: String,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    let request = HttpRequest {
        method,
        path,
        headers,
        body,
    };
    let response = handler(&request, &base_url);
    requests.lock().unwrap().push(request);

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        if response.status < 400 { "OK" } else { "Error" },
        response.declared_len.unwrap_or(response.body.len()),
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&response.body).await;
    let _ = socket.shutdown().await;
}
