//! Configuration loading, validation, and management for Lantern.
//!
//! Loads configuration from `~/.lantern/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine kinds understood by the worker.
pub const ENGINE_KINDS: &[&str] = &["openai_compat", "local", "echo"];

/// The root configuration structure.
///
/// Maps directly to `~/.lantern/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which engine the worker runs and how the front end counts its tokens
    #[serde(default)]
    pub engine: EngineConfig,

    /// Context window and output budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Worker process settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Chat history persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Conversation assembly
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// One of [`ENGINE_KINDS`]
    #[serde(default = "default_engine_kind")]
    pub kind: String,

    /// Model name (server model id, preset alias, or GGUF path)
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible server
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat template used for counting: "chatml", "llama3", "gemma"
    #[serde(default = "default_chat_template")]
    pub chat_template: String,

    /// Path to a `tokenizer.json` for exact counting (requires the `local` feature)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<String>,

    /// HTTP timeout for remote engines, 0 = wait indefinitely
    #[serde(default)]
    pub request_timeout_secs: u64,
}

fn default_engine_kind() -> String {
    "openai_compat".into()
}
fn default_model() -> String {
    "gemma3n".into()
}
fn default_api_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_chat_template() -> String {
    "gemma".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            model: default_model(),
            api_url: default_api_url(),
            api_key: None,
            chat_template: default_chat_template(),
            tokenizer_path: None,
            request_timeout_secs: 0,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("chat_template", &self.chat_template)
            .field("tokenizer_path", &self.tokenizer_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// The engine's fixed context window
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Tokens reserved for control tokens and padding
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer: usize,

    /// Output is never granted fewer tokens than this
    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: usize,

    /// Output tokens requested when the conversation leaves room
    #[serde(default = "default_desired_output_tokens")]
    pub desired_output_tokens: usize,
}

fn default_max_context_tokens() -> usize {
    32_000
}
fn default_safety_buffer() -> usize {
    100
}
fn default_min_output_tokens() -> usize {
    512
}
fn default_desired_output_tokens() -> usize {
    8_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            safety_buffer: default_safety_buffer(),
            min_output_tokens: default_min_output_tokens(),
            desired_output_tokens: default_desired_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable; defaults to the running `lantern` binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments placed before `--input`/`--output`; defaults to `["worker"]`
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,

    /// How long a terminated worker gets to exit before it is killed
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Where hand-off files are written; defaults to the system temp dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_dir: Option<String>,
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".into()]
}
fn default_grace_period_ms() -> u64 {
    2_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_worker_args(),
            grace_period_ms: default_grace_period_ms(),
            handoff_dir: None,
        }
    }
}

impl WorkerConfig {
    pub fn handoff_dir(&self) -> PathBuf {
        self.handoff_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "file" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "file".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("chats.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Upper bound for request bodies (inline images and audio included)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Used when the caller supplies no system prompt
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    /// Longer system prompts are truncated at a sentence or word boundary
    #[serde(default = "default_max_system_prompt_chars")]
    pub max_system_prompt_chars: usize,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}
fn default_max_system_prompt_chars() -> usize {
    2_000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: default_system_prompt(),
            max_system_prompt_chars: default_max_system_prompt_chars(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lantern/config.toml).
    ///
    /// Environment variables override the file:
    /// - `LANTERN_ENGINE`
    /// - `LANTERN_MODEL`
    /// - `LANTERN_API_URL`
    /// - `LANTERN_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(kind) = std::env::var("LANTERN_ENGINE") {
            config.engine.kind = kind;
        }
        if let Ok(model) = std::env::var("LANTERN_MODEL") {
            config.engine.model = model;
        }
        if let Ok(url) = std::env::var("LANTERN_API_URL") {
            config.engine.api_url = url;
        }
        if config.engine.api_key.is_none() {
            config.engine.api_key = std::env::var("LANTERN_API_KEY").ok();
        }

        config.validate()?;
        Ok(config)
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lantern")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !ENGINE_KINDS.contains(&self.engine.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "engine.kind must be one of {}, got '{}'",
                ENGINE_KINDS.join(", "),
                self.engine.kind
            )));
        }

        let ctx = &self.context;
        if ctx.safety_buffer >= ctx.max_context_tokens {
            return Err(ConfigError::ValidationError(
                "context.safety_buffer must be smaller than context.max_context_tokens".into(),
            ));
        }
        if ctx.min_output_tokens >= ctx.max_context_tokens - ctx.safety_buffer {
            return Err(ConfigError::ValidationError(
                "context.min_output_tokens must leave room for input".into(),
            ));
        }
        if ctx.desired_output_tokens < ctx.min_output_tokens {
            return Err(ConfigError::ValidationError(
                "context.desired_output_tokens must be at least context.min_output_tokens".into(),
            ));
        }

        if self.worker.grace_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "worker.grace_period_ms must be > 0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be 'file' or 'memory', got '{}'",
                self.store.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.max_context_tokens, 32_000);
        assert_eq!(config.context.safety_buffer, 100);
        assert_eq!(config.context.min_output_tokens, 512);
        assert_eq!(config.worker.grace_period_ms, 2_000);
        assert_eq!(config.worker.args, vec!["worker".to_string()]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.kind, config.engine.kind);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn unknown_engine_rejected() {
        let mut config = AppConfig::default();
        config.engine.kind = "telepathy".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_floor_must_fit_window() {
        let mut config = AppConfig::default();
        config.context.max_context_tokens = 600;
        config.context.safety_buffer = 100;
        config.context.min_output_tokens = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.engine.kind, "openai_compat");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[engine]
kind = "echo"

[context]
max_context_tokens = 8192

[worker]
grace_period_ms = 500
handoff_dir = "/var/tmp/lantern"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.kind, "echo");
        assert_eq!(config.context.max_context_tokens, 8192);
        assert_eq!(config.context.safety_buffer, 100);
        assert_eq!(config.worker.grace_period_ms, 500);
        assert_eq!(config.worker.handoff_dir(), PathBuf::from("/var/tmp/lantern"));
        assert_eq!(config.chat.max_system_prompt_chars, 2_000);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[context\nmax_context_tokens = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.engine.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openai_compat"));
        assert!(toml_str.contains("32000"));
    }
}
