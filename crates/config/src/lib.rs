//! Configuration loading, validation, and management for Tabwise.
//!
//! Loads configuration from `~/.tabwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tabwise_core::environment::RuntimeProfile;

/// The root configuration structure.
///
/// Maps directly to `~/.tabwise/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model selection and generation settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Runtime profile and initialization settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Conversation store limits
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Memory-pressure thresholds
    #[serde(default)]
    pub resources: ResourceConfig,

    /// TL;DR summarization settings
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Privacy settings
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Preset alias (e.g. "tinyllama", "qwen:0.5b") or a path to a `.gguf` file
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_model_name() -> String {
    "qwen:0.5b".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_system_prompt() -> String {
    "You are a concise, helpful browsing assistant running entirely on this device. \
     Answer using the provided page context when it is relevant."
        .into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub profile: RuntimeProfile,

    /// Installed memory below this refuses to initialize
    #[serde(default = "default_min_system_memory_gb")]
    pub min_system_memory_gb: f64,

    /// How often to poll a running model download
    #[serde(default = "default_download_poll_interval_ms")]
    pub download_poll_interval_ms: u64,
}

fn default_min_system_memory_gb() -> f64 {
    8.0
}
fn default_download_poll_interval_ms() -> u64 {
    500
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: RuntimeProfile::default(),
            min_system_memory_gb: default_min_system_memory_gb(),
            download_poll_interval_ms: default_download_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_max_session_tokens")]
    pub max_session_tokens: usize,

    /// Number of recent messages sent to the engine with each query
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Upper bound on page text included as query context
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_max_messages() -> usize {
    1000
}
fn default_max_session_tokens() -> usize {
    32_000
}
fn default_history_window() -> usize {
    10
}
fn default_max_context_chars() -> usize {
    4000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_session_tokens: default_max_session_tokens(),
            history_window: default_history_window(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Refuse to run inference with less available memory than this
    #[serde(default = "default_min_available_gb")]
    pub min_available_gb: f64,

    /// Available/total ratio at or below which pressure is "warning"
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,

    /// Available/total ratio at or below which pressure is "critical"
    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,

    /// Use this instead of asking the OS for installed memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_memory_gb_override: Option<f64>,
}

fn default_min_available_gb() -> f64 {
    1.0
}
fn default_warning_ratio() -> f64 {
    0.20
}
fn default_critical_ratio() -> f64 {
    0.08
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            min_available_gb: default_min_available_gb(),
            warning_ratio: default_warning_ratio(),
            critical_ratio: default_critical_ratio(),
            total_memory_gb_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Characters of page text in the first summarization attempt
    #[serde(default = "default_primary_prefix_chars")]
    pub primary_prefix_chars: usize,

    /// Characters of page text in the simplified retry
    #[serde(default = "default_retry_prefix_chars")]
    pub retry_prefix_chars: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_retry_max_tokens")]
    pub retry_max_tokens: u32,
}

fn default_primary_prefix_chars() -> usize {
    1500
}
fn default_retry_prefix_chars() -> usize {
    800
}
fn default_summary_max_tokens() -> u32 {
    160
}
fn default_retry_max_tokens() -> u32 {
    100
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            primary_prefix_chars: default_primary_prefix_chars(),
            retry_prefix_chars: default_retry_prefix_chars(),
            max_tokens: default_summary_max_tokens(),
            retry_max_tokens: default_retry_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Where on-device assistant data may be written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Whether page text may be sent to the model as context
    #[serde(default = "default_true")]
    pub allow_page_context: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            allow_page_context: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tabwise/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `TABWISE_MODEL`
    /// - `TABWISE_PROFILE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if let Ok(model) = std::env::var("TABWISE_MODEL") {
            config.model.name = model;
        }

        if let Ok(profile) = std::env::var("TABWISE_PROFILE") {
            config.runtime.profile = profile
                .parse()
                .map_err(ConfigError::ValidationError)?;
        }

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
        dirs_home().join(".tabwise")
    }

    /// Directory for assistant data (privacy-scoped).
    pub fn data_dir(&self) -> PathBuf {
        self.privacy
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("data"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_tokens must be > 0".into(),
            ));
        }

        let conv = &self.conversation;
        if conv.max_messages == 0 || conv.max_session_tokens == 0 || conv.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "conversation limits must all be > 0".into(),
            ));
        }

        if self.runtime.download_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.download_poll_interval_ms must be > 0".into(),
            ));
        }

        let res = &self.resources;
        if !(0.0 < res.critical_ratio && res.critical_ratio < res.warning_ratio && res.warning_ratio < 1.0)
        {
            return Err(ConfigError::ValidationError(
                "resources ratios must satisfy 0 < critical_ratio < warning_ratio < 1".into(),
            ));
        }

        let summary = &self.summary;
        if summary.retry_prefix_chars == 0 || summary.retry_prefix_chars >= summary.primary_prefix_chars {
            return Err(ConfigError::ValidationError(
                "summary.retry_prefix_chars must be > 0 and smaller than primary_prefix_chars".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
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
