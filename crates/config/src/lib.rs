//! Configuration loading, validation, and management for Forgepilot.
//!
//! Loads configuration from `~/.forgepilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.forgepilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Agentic loop policy
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context window shaping
    #[serde(default)]
    pub context: ContextConfig,

    /// Final-answer streaming
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Circuit breaker tuning
    #[serde(default)]
    pub breakers: BreakersConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Built-in tools
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Display name of the backend (e.g. "openai", "ollama")
    #[serde(default = "default_backend_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: default_backend_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model calls per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Model calls a turn should make before a tool-free answer is accepted
    /// without a completion phrase
    #[serde(default = "default_min_iterations")]
    pub min_iterations: u32,

    /// Wall-clock budget of one turn
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Execute only the first of several requested tool calls
    #[serde(default = "default_true")]
    pub single_tool_per_step: bool,

    /// Phrases that mark a response as a finished answer
    #[serde(default = "default_completion_phrases")]
    pub completion_phrases: Vec<String>,

    /// Retry once when the model answers a tool result with nothing
    #[serde(default = "default_true")]
    pub retry_empty_after_tool: bool,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_min_iterations() -> u32 {
    1
}
fn default_turn_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}
fn default_completion_phrases() -> Vec<String> {
    [
        "in summary",
        "to summarize",
        "here is the answer",
        "here's what i found",
        "let me know if",
        "task complete",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            min_iterations: default_min_iterations(),
            turn_timeout_secs: default_turn_timeout_secs(),
            single_tool_per_step: true,
            completion_phrases: default_completion_phrases(),
            retry_empty_after_tool: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Messages of history sent to the model
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Narration older than this many messages is dropped
    #[serde(default = "default_ephemeral_window")]
    pub ephemeral_window: usize,

    /// Tool output longer than this (in characters) is compressed
    #[serde(default = "default_tool_output_limit")]
    pub tool_output_limit: usize,

    /// Items named in a compressed list summary
    #[serde(default = "default_list_preview_items")]
    pub list_preview_items: usize,

    /// Optional document appended to the system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_context_file: Option<PathBuf>,
}

fn default_history_limit() -> usize {
    30
}
fn default_ephemeral_window() -> usize {
    8
}
fn default_tool_output_limit() -> usize {
    600
}
fn default_list_preview_items() -> usize {
    3
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            ephemeral_window: default_ephemeral_window(),
            tool_output_limit: default_tool_output_limit(),
            list_preview_items: default_list_preview_items(),
            project_context_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Characters per `chunk` event
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between chunks; 0 disables it
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

fn default_chunk_size() -> usize {
    50
}
fn default_chunk_delay_ms() -> u64 {
    15
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

/// Tuning of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTuning {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    #[serde(default = "default_half_open_max")]
    pub half_open_max: u32,
}

fn default_max_failures() -> u32 {
    5
}
fn default_reset_timeout_secs() -> u64 {
    60
}
fn default_half_open_max() -> u32 {
    3
}

impl Default for BreakerTuning {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max: default_half_open_max(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakersConfig {
    /// Applies to every breaker without an override
    #[serde(flatten)]
    pub defaults: BreakerTuning,

    /// Per-breaker tuning, keyed by breaker name (`model-backend`,
    /// `tool:write_file`, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, BreakerTuning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42817
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory whose subdirectories are the repositories tools operate on
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    AppConfig::config_dir().join("repos")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply
    /// environment overrides.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// Like [`AppConfig::load`], for an explicit file.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Default location of the config file.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.backend.api_key.is_none() {
            self.backend.api_key =
                lookup("FORGEPILOT_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("FORGEPILOT_MODEL") {
            self.backend.model = model;
        }
        if let Some(url) = lookup("FORGEPILOT_API_URL") {
            self.backend.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgepilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return fail("backend.temperature must be between 0.0 and 2.0");
        }
        if self.agent.max_iterations == 0 {
            return fail("agent.max_iterations must be at least 1");
        }
        if self.agent.min_iterations > self.agent.max_iterations {
            return fail("agent.min_iterations must not exceed agent.max_iterations");
        }
        if self.agent.turn_timeout_secs == 0 {
            return fail("agent.turn_timeout_secs must be > 0");
        }
        if self.streaming.chunk_size == 0 {
            return fail("streaming.chunk_size must be > 0");
        }
        let tunings =
            std::iter::once(&self.breakers.defaults).chain(self.breakers.overrides.values());
        for t in tunings {
            if t.max_failures == 0 {
                return fail("breakers.max_failures must be > 0");
            }
            if t.half_open_max == 0 {
                return fail("breakers.half_open_max must be > 0");
            }
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Read the project context document, if one is configured.
    pub fn project_context(&self) -> Option<String> {
        let path = self.context.project_context_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("Could not read project context {}: {e}", path.display());
                None
            }
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
