//! Browser automation over the W3C WebDriver HTTP protocol.
//!
//! The engine owns exactly one browser session. The session lock is held for
//! the whole action, so two in-flight tool calls never drive the page at the
//! same time.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ToolError;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Extracted text is cut to this many characters.
const MAX_TEXT_CHARS: usize = 20_000;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A single page interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate { url: String },
    Click { selector: String },
    Fill { selector: String, text: String, submit: bool },
    ExtractText { selector: Option<String> },
    WaitForElement { selector: String, timeout_ms: u64 },
    Scroll { dy: i64 },
}

/// The browser session behind the stored id is gone.
#[derive(Debug, Error)]
#[error("browser session lost ({0})")]
struct SessionLost(String);

/// Something that can perform page interactions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn perform_action(&self, action: BrowserAction) -> anyhow::Result<Value>;

    /// Release the browser session, if one is open.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// WebDriver-backed engine (chromedriver, geckodriver, ...).
pub struct WebDriverEngine {
    client: reqwest::Client,
    base_url: String,
    headless: bool,
    session: Mutex<Option<String>>,
}

impl WebDriverEngine {
    pub fn new(base_url: impl Into<String>, headless: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headless,
            session: Mutex::new(None),
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("WebDriver {} {} failed", method, path))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .context("failed to parse WebDriver response")?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(value);
        }

        let error = value["error"].as_str().unwrap_or("unknown error");
        let message = value["message"].as_str().unwrap_or("");
        if error == "invalid session id" || error == "no such window" {
            return Err(SessionLost(format!("{}: {}", error, message)).into());
        }
        if error == "no such element" {
            return Err(ToolError::NotFound(message.to_string()).into());
        }
        if error == "invalid selector" || error == "invalid argument" {
            return Err(ToolError::InvalidArguments(message.to_string()).into());
        }
        anyhow::bail!("WebDriver {} ({}): {}", error, status, message)
    }

    async fn new_session(&self) -> anyhow::Result<String> {
        let mut args = vec!["--window-size=1280,900"];
        if self.headless {
            args.push("--headless=new");
        }
        let value = self
            .command(
                Method::POST,
                "/session",
                Some(json!({
                    "capabilities": {
                        "alwaysMatch": {
                            "browserName": "chrome",
                            "goog:chromeOptions": { "args": args }
                        }
                    }
                })),
            )
            .await?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("WebDriver did not return a session id"))?
            .to_string();
        info!(session_id = %session_id, headless = self.headless, "Browser session started");
        Ok(session_id)
    }

    async fn find(&self, session: &str, selector: &str) -> anyhow::Result<String> {
        let value = self
            .command(
                Method::POST,
                &format!("/session/{}/element", session),
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        value[ELEMENT_KEY]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("WebDriver returned no element reference for '{}'", selector))
    }

    async fn run(&self, session: &str, action: BrowserAction) -> anyhow::Result<Value> {
        match action {
            BrowserAction::Navigate { url } => {
                url::Url::parse(&url)
                    .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{}': {}", url, e)))?;
                self.command(
                    Method::POST,
                    &format!("/session/{}/url", session),
                    Some(json!({ "url": url })),
                )
                .await?;
                let title = self
                    .command(Method::GET, &format!("/session/{}/title", session), None)
                    .await?;
                Ok(json!({ "url": url, "title": title }))
            }
            BrowserAction::Click { selector } => {
                let element = self.find(session, &selector).await?;
                self.command(
                    Method::POST,
                    &format!("/session/{}/element/{}/click", session, element),
                    Some(json!({})),
                )
                .await?;
                Ok(json!({ "clicked": selector }))
            }
            BrowserAction::Fill {
                selector,
                text,
                submit,
            } => {
                let element = self.find(session, &selector).await?;
                self.command(
                    Method::POST,
                    &format!("/session/{}/element/{}/clear", session, element),
                    Some(json!({})),
                )
                .await?;
                let mut keys = text.clone();
                if submit {
                    keys.push('\u{E007}');
                }
                self.command(
                    Method::POST,
                    &format!("/session/{}/element/{}/value", session, element),
                    Some(json!({ "text": keys })),
                )
                .await?;
                Ok(json!({ "filled": selector, "text": text, "submitted": submit }))
            }
            BrowserAction::ExtractText { selector } => {
                let selector = selector.unwrap_or_else(|| "body".to_string());
                let element = self.find(session, &selector).await?;
                let text = self
                    .command(
                        Method::GET,
                        &format!("/session/{}/element/{}/text", session, element),
                        None,
                    )
                    .await?;
                let text = text.as_str().unwrap_or_default();
                let (text, truncated) = truncate_chars(text, MAX_TEXT_CHARS);
                Ok(json!({ "selector": selector, "text": text, "truncated": truncated }))
            }
            BrowserAction::WaitForElement {
                selector,
                timeout_ms,
            } => {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
                loop {
                    match self.find(session, &selector).await {
                        Ok(_) => return Ok(json!({ "found": selector })),
                        Err(e) if matches!(e.downcast_ref::<ToolError>(), Some(ToolError::NotFound(_))) => {
                            if tokio::time::Instant::now() >= deadline {
                                anyhow::bail!(
                                    "element '{}' did not appear within {}ms",
                                    selector,
                                    timeout_ms
                                );
                            }
                            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            BrowserAction::Scroll { dy } => {
                let position = self
                    .command(
                        Method::POST,
                        &format!("/session/{}/execute/sync", session),
                        Some(json!({
                            "script": "window.scrollBy(0, arguments[0]); return window.scrollY;",
                            "args": [dy],
                        })),
                    )
                    .await?;
                Ok(json!({ "scroll_y": position }))
            }
        }
    }
}

#[async_trait]
impl BrowserEngine for WebDriverEngine {
    async fn perform_action(&self, action: BrowserAction) -> anyhow::Result<Value> {
        let mut session = self.session.lock().await;
        let session_id = match session.as_ref() {
            Some(id) => id.clone(),
            None => {
                let id = self.new_session().await?;
                *session = Some(id.clone());
                id
            }
        };

        debug!(session_id = %session_id, action = ?action, "Browser action");
        let result = self.run(&session_id, action).await;
        if let Err(e) = &result {
            if e.downcast_ref::<SessionLost>().is_some() {
                warn!(session_id = %session_id, error = %e, "Browser session lost, next action starts a new one");
                *session = None;
            }
        }
        result
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.take() {
            if let Err(e) = self
                .command(Method::DELETE, &format!("/session/{}", id), None)
                .await
            {
                warn!(session_id = %id, error = %e, "Failed to close browser session");
                return Err(e);
            }
            info!(session_id = %id, "Browser session closed");
        }
        Ok(())
    }
}

/// Cut `s` to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (format!("{}... [truncated]", &s[..idx]), true),
        None => (s.to_string(), false),
    }
}
