//! Browser tools. Each tool maps to one [`BrowserAction`] on the shared engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolEffect};
use crate::browser::{BrowserAction, BrowserEngine};
use crate::error::ToolError;

const BROWSER_RESOURCE: &str = "browser";
const DEFAULT_WAIT_MS: u64 = 10_000;
const MAX_WAIT_MS: u64 = 60_000;
const DEFAULT_SCROLL_PX: i64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserActionKind {
    BrowseUrl,
    Click,
    Fill,
    ExtractText,
    WaitForElement,
    Scroll,
}

/// All browser tools bound to one engine.
pub fn browser_tools(engine: Arc<dyn BrowserEngine>) -> Vec<Arc<dyn Tool>> {
    [
        BrowserActionKind::BrowseUrl,
        BrowserActionKind::Click,
        BrowserActionKind::Fill,
        BrowserActionKind::ExtractText,
        BrowserActionKind::WaitForElement,
        BrowserActionKind::Scroll,
    ]
    .into_iter()
    .map(|kind| {
        Arc::new(BrowserTool {
            kind,
            engine: engine.clone(),
        }) as Arc<dyn Tool>
    })
    .collect()
}

/// One browser interaction exposed as a tool.
pub struct BrowserTool {
    kind: BrowserActionKind,
    engine: Arc<dyn BrowserEngine>,
}

impl BrowserTool {
    fn parse(&self, args: &Value) -> anyhow::Result<BrowserAction> {
        let action = match self.kind {
            BrowserActionKind::BrowseUrl => BrowserAction::Navigate {
                url: required_str(args, "url")?.to_string(),
            },
            BrowserActionKind::Click => BrowserAction::Click {
                selector: required_str(args, "selector")?.to_string(),
            },
            BrowserActionKind::Fill => BrowserAction::Fill {
                selector: required_str(args, "selector")?.to_string(),
                text: args["text"]
                    .as_str()
                    .ok_or_else(|| ToolError::InvalidArguments("missing 'text' argument".into()))?
                    .to_string(),
                submit: args["submit"].as_bool().unwrap_or(false),
            },
            BrowserActionKind::ExtractText => BrowserAction::ExtractText {
                selector: args["selector"]
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string),
            },
            BrowserActionKind::WaitForElement => BrowserAction::WaitForElement {
                selector: required_str(args, "selector")?.to_string(),
                timeout_ms: args["timeout_ms"]
                    .as_u64()
                    .unwrap_or(DEFAULT_WAIT_MS)
                    .min(MAX_WAIT_MS),
            },
            BrowserActionKind::Scroll => BrowserAction::Scroll {
                dy: args["dy"].as_i64().unwrap_or(DEFAULT_SCROLL_PX),
            },
        };
        Ok(action)
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        match self.kind {
            BrowserActionKind::BrowseUrl => "browse_url",
            BrowserActionKind::Click => "click",
            BrowserActionKind::Fill => "fill",
            BrowserActionKind::ExtractText => "extract_text",
            BrowserActionKind::WaitForElement => "wait_for_element",
            BrowserActionKind::Scroll => "scroll",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            BrowserActionKind::BrowseUrl => "Navigate the browser to a URL. Returns the page title.",
            BrowserActionKind::Click => "Click the first element matching a CSS selector.",
            BrowserActionKind::Fill => {
                "Clear and type text into the input matching a CSS selector. Set submit=true to press Enter afterwards."
            }
            BrowserActionKind::ExtractText => {
                "Extract the visible text of the element matching a CSS selector (default: the whole page body)."
            }
            BrowserActionKind::WaitForElement => {
                "Wait until an element matching a CSS selector appears (default timeout 10000 ms)."
            }
            BrowserActionKind::Scroll => "Scroll the page vertically by dy pixels (default 800).",
        }
    }

    fn parameters_schema(&self) -> Value {
        match self.kind {
            BrowserActionKind::BrowseUrl => json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute URL to open" }
                },
                "required": ["url"]
            }),
            BrowserActionKind::Click => json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" }
                },
                "required": ["selector"]
            }),
            BrowserActionKind::Fill => json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector of the input" },
                    "text": { "type": "string", "description": "Text to type" },
                    "submit": { "type": "boolean", "description": "Press Enter after typing (default: false)" }
                },
                "required": ["selector", "text"]
            }),
            BrowserActionKind::ExtractText => json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector (default: body)" }
                }
            }),
            BrowserActionKind::WaitForElement => json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" },
                    "timeout_ms": { "type": "integer", "description": "Maximum wait in milliseconds (default: 10000)" }
                },
                "required": ["selector"]
            }),
            BrowserActionKind::Scroll => json!({
                "type": "object",
                "properties": {
                    "dy": { "type": "integer", "description": "Pixels to scroll; negative scrolls up (default: 800)" }
                }
            }),
        }
    }

    fn effect(&self) -> ToolEffect {
        match self.kind {
            BrowserActionKind::Click | BrowserActionKind::Fill => ToolEffect::Write,
            _ => ToolEffect::ReadOnly,
        }
    }

    fn resource(&self) -> Option<&'static str> {
        Some(BROWSER_RESOURCE)
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let action = self.parse(&args)?;
        self.engine.perform_action(action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::testing::RecordingBrowser;

    fn tool(kind: BrowserActionKind, engine: Arc<RecordingBrowser>) -> BrowserTool {
        BrowserTool { kind, engine }
    }

    #[test]
    fn all_tools_share_the_browser_resource() {
        let tools = browser_tools(Arc::new(RecordingBrowser::default()));
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["browse_url", "click", "fill", "extract_text", "wait_for_element", "scroll"]
        );
        assert!(tools.iter().all(|t| t.resource() == Some("browser")));
    }

    #[test]
    fn page_mutations_are_write_tools() {
        let engine = Arc::new(RecordingBrowser::default());
        assert_eq!(tool(BrowserActionKind::Click, engine.clone()).effect(), ToolEffect::Write);
        assert_eq!(tool(BrowserActionKind::Fill, engine.clone()).effect(), ToolEffect::Write);
        assert_eq!(tool(BrowserActionKind::ExtractText, engine).effect(), ToolEffect::ReadOnly);
    }

    #[tokio::test]
    async fn fill_parses_submit_flag() {
        let engine = Arc::new(RecordingBrowser::default());
        tool(BrowserActionKind::Fill, engine.clone())
            .execute(json!({"selector": "#data-search", "text": "spike protein", "submit": true}))
            .await
            .unwrap();
        assert_eq!(
            engine.actions(),
            vec![BrowserAction::Fill {
                selector: "#data-search".into(),
                text: "spike protein".into(),
                submit: true,
            }]
        );
    }

    #[tokio::test]
    async fn wait_timeout_is_capped() {
        let engine = Arc::new(RecordingBrowser::default());
        tool(BrowserActionKind::WaitForElement, engine.clone())
            .execute(json!({"selector": "td", "timeout_ms": 600000}))
            .await
            .unwrap();
        assert_eq!(
            engine.actions(),
            vec![BrowserAction::WaitForElement {
                selector: "td".into(),
                timeout_ms: MAX_WAIT_MS,
            }]
        );
    }

    #[tokio::test]
    async fn missing_url_is_invalid_arguments() {
        let engine = Arc::new(RecordingBrowser::default());
        let err = tool(BrowserActionKind::BrowseUrl, engine.clone())
            .execute(json!({}))
            .await
            .unwrap_err();
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::InvalidArguments);
        assert!(engine.actions().is_empty());
    }
}
