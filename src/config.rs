//! Configuration management for cryoet-scout.
//!
//! Configuration is read once at startup from environment variables:
//! - `OPENROUTER_API_KEY` - Required. API key for the chat backend.
//! - `OPENROUTER_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to OpenRouter.
//! - `DEFAULT_MODEL` - Optional. Model for both agents. Defaults to `google/gemini-2.5-pro`.
//! - `INITIATOR_MODEL` / `EXECUTOR_MODEL` - Optional. Per-agent model override.
//! - `TEMPERATURE` - Optional. Sampling temperature. Defaults to `0`.
//! - `MAX_STEPS` - Optional. Turn ceiling for a session. Defaults to `30`.
//! - `GENERATE_TIMEOUT_SECS` - Optional. Bound on one agent generation. Defaults to `180`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Bound on one tool call. Defaults to `300`.
//! - `TOOL_RETRIES` - Optional. Extra attempts for read-only tools. Defaults to `1`.
//! - `PARALLEL_TOOL_DISPATCH` - Optional. Run independent read-only calls concurrently. Defaults to `false`.
//! - `TERMINATION_SENTINEL` - Optional. Completion phrase. Defaults to `CAMEL_TASK_DONE`.
//! - `OUTPUT_DIR` - Optional. Download directory. Defaults to `./results`.
//! - `CRYOET_PORTAL_URL` - Optional. Portal GraphQL endpoint.
//! - `WEBDRIVER_URL` - Optional. WebDriver server; browser tools are enabled when set.
//! - `BROWSER_HEADLESS` - Optional. Run the browser headless. Defaults to `false`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::portal::DEFAULT_PORTAL_URL;

pub const DEFAULT_MAX_STEPS: usize = 30;
pub const DEFAULT_SENTINEL: &str = "CAMEL_TASK_DONE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Browser engine configuration.
#[derive(Debug, Clone, Default)]
pub struct BrowserConfig {
    /// WebDriver server URL (e.g. chromedriver on `http://localhost:9515`)
    pub webdriver_url: Option<String>,

    /// Run the browser without a window
    pub headless: bool,
}

impl BrowserConfig {
    pub fn is_enabled(&self) -> bool {
        self.webdriver_url.is_some()
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat backend API key
    pub api_key: String,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Model used by the initiator agent
    pub initiator_model: String,

    /// Model used by the executor agent
    pub executor_model: String,

    /// Sampling temperature for both agents
    pub temperature: f32,

    /// Maximum number of turns after the opening message
    pub max_steps: usize,

    /// Bound on a single agent generation
    pub generate_timeout: Duration,

    /// Bound on a single tool dispatch
    pub tool_timeout: Duration,

    /// Extra attempts for read-only tools
    pub tool_retries: u32,

    /// Dispatch independent read-only calls of one message concurrently
    pub parallel_tool_dispatch: bool,

    /// Phrase that marks the task as complete
    pub termination_sentinel: String,

    /// Where downloaded artifacts are written
    pub output_dir: PathBuf,

    /// Data portal GraphQL endpoint
    pub portal_url: String,

    /// Browser engine configuration
    pub browser: BrowserConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for unparsable numbers or flags.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = get("OPENROUTER_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model =
            get("DEFAULT_MODEL").unwrap_or_else(|| "google/gemini-2.5-pro".to_string());
        let initiator_model = get("INITIATOR_MODEL").unwrap_or_else(|| default_model.clone());
        let executor_model = get("EXECUTOR_MODEL").unwrap_or_else(|| default_model.clone());

        let temperature: f32 = parse_var(&get, "TEMPERATURE", 0.0)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", temperature),
            ));
        }

        let max_steps: usize = parse_var(&get, "MAX_STEPS", DEFAULT_MAX_STEPS)?;
        if max_steps == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_STEPS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let generate_timeout = Duration::from_secs(parse_var(&get, "GENERATE_TIMEOUT_SECS", 180)?);
        let tool_timeout = Duration::from_secs(parse_var(&get, "TOOL_TIMEOUT_SECS", 300)?);
        let tool_retries = parse_var(&get, "TOOL_RETRIES", 1)?;

        let parallel_tool_dispatch = get("PARALLEL_TOOL_DISPATCH")
            .map(|v| {
                parse_bool(&v)
                    .map_err(|e| ConfigError::InvalidValue("PARALLEL_TOOL_DISPATCH".to_string(), e))
            })
            .transpose()?
            .unwrap_or(false);

        let termination_sentinel = get("TERMINATION_SENTINEL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SENTINEL.to_string());

        let output_dir = get("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./results"));

        let portal_url = get("CRYOET_PORTAL_URL").unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string());

        let browser = BrowserConfig {
            webdriver_url: get("WEBDRIVER_URL").filter(|v| !v.trim().is_empty()),
            headless: get("BROWSER_HEADLESS")
                .map(|v| {
                    parse_bool(&v)
                        .map_err(|e| ConfigError::InvalidValue("BROWSER_HEADLESS".to_string(), e))
                })
                .transpose()?
                .unwrap_or(false),
        };

        Ok(Self {
            api_key,
            base_url: get("OPENROUTER_BASE_URL").filter(|v| !v.trim().is_empty()),
            initiator_model,
            executor_model,
            temperature,
            max_steps,
            generate_timeout,
            tool_timeout,
            tool_retries,
            parallel_tool_dispatch,
            termination_sentinel,
            output_dir,
            portal_url,
            browser,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, output_dir: PathBuf) -> Self {
        Self {
            api_key,
            base_url: None,
            initiator_model: model.clone(),
            executor_model: model,
            temperature: 0.0,
            max_steps: DEFAULT_MAX_STEPS,
            generate_timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(300),
            tool_retries: 1,
            parallel_tool_dispatch: false,
            termination_sentinel: DEFAULT_SENTINEL.to_string(),
            output_dir,
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            browser: BrowserConfig::default(),
        }
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
