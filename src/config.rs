//! Configuration system for the AutoTeam service
//!
//! Configuration is read from a TOML file. Every section has defaults so an
//! empty file (or no file at all) yields a runnable service backed by the mock
//! provider and in-memory storage. Secrets are never stored in the file: the
//! `[llm]` section names the environment variable holding the API key.

use crate::events::bus::MAX_CAPACITY;
use crate::pipeline::stages::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main service configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub storage: StorageSection,
    /// Per-role system instruction overrides keyed by role key (e.g. "qa")
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Closed set of generation providers, selected once at startup
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Model used when the config does not name one
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock-model",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-20241022",
            ProviderKind::Gemini => "gemini-2.5-flash",
        }
    }
}

/// LLM section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model identifier; provider default when absent
    pub model: Option<String>,
    /// Environment variable containing the API key
    pub api_key_env: Option<String>,
    /// Override for the provider's API base URL
    pub base_url: Option<String>,
    /// Optional temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
    /// Optional max tokens
    pub max_tokens: Option<u32>,
    /// HTTP timeout per generation call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            model: None,
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

impl LlmSection {
    /// Effective model name
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the environment variable named by `api_key_env`
    pub fn api_key(&self) -> Result<String, ConfigError> {
        let name = self.api_key_env.as_deref().ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "provider '{}' requires llm.api_key_env",
                self.provider.as_str()
            ))
        })?;
        std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
    }
}

/// Pipeline execution section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Additional attempts after a stage's first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in seconds; doubles on every further retry
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: f64,
    /// Capacity of each job's event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Number of closed job ids the event bus remembers for late subscribers
    #[serde(default = "default_closed_job_memory")]
    pub closed_job_memory: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            event_buffer: default_event_buffer(),
            closed_job_memory: default_closed_job_memory(),
        }
    }
}

/// Longest first backoff delay accepted, in seconds
pub const MAX_INITIAL_BACKOFF_SECS: f64 = 3600.0;

impl PipelineSection {
    /// First backoff delay, rejecting values outside `0..=MAX_INITIAL_BACKOFF_SECS`
    pub fn initial_backoff(&self) -> Result<Duration, ConfigError> {
        let secs = self.initial_backoff_secs;
        if !(0.0..=MAX_INITIAL_BACKOFF_SECS).contains(&secs) {
            return Err(ConfigError::InvalidConfig(format!(
                "pipeline.initial_backoff_secs {secs} must be between 0 and {MAX_INITIAL_BACKOFF_SECS}"
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|err| {
            ConfigError::InvalidConfig(format!("pipeline.initial_backoff_secs: {err}"))
        })
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_secs() -> f64 {
    1.0
}

fn default_event_buffer() -> usize {
    1024
}

fn default_closed_job_memory() -> usize {
    4096
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Storage section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite database file (":memory:" for a private in-memory database)
    pub path: Option<PathBuf>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.provider != ProviderKind::Mock && self.llm.api_key_env.is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "provider '{}' requires llm.api_key_env",
                self.llm.provider.as_str()
            )));
        }

        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidConfig(format!(
                    "llm.temperature {temperature} must be between 0.0 and 2.0"
                )));
            }
        }

        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "llm.timeout_secs must be positive".to_string(),
            ));
        }

        self.pipeline.initial_backoff()?;

        if !(1..=MAX_CAPACITY).contains(&self.pipeline.event_buffer) {
            return Err(ConfigError::InvalidConfig(format!(
                "pipeline.event_buffer must be between 1 and {MAX_CAPACITY}"
            )));
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(ConfigError::InvalidConfig(
                "sqlite storage requires storage.path".to_string(),
            ));
        }

        for key in self.prompts.keys() {
            if Role::from_key(key).is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "unknown role '{key}' in [prompts]"
                )));
            }
        }

        Ok(())
    }

    /// Get LLM API key from the configured environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        self.llm.api_key()
    }

    /// System instruction overrides resolved to roles
    pub fn role_overrides(&self) -> Vec<(Role, String)> {
        self.prompts
            .iter()
            .filter_map(|(key, text)| Role::from_key(key).map(|role| (role, text.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9000

[llm]
provider = "gemini"
model = "gemini-2.5-flash"
api_key_env = "GEMINI_API_KEY"
temperature = 0.4
max_tokens = 2048

[pipeline]
max_retries = 3
initial_backoff_secs = 0.5

[storage]
backend = "sqlite"
path = "autoteam.db"

[prompts]
qa = "You are a meticulous QA lead."
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.llm.provider, ProviderKind::Gemini);
        assert_eq!(config.llm.model_name(), "gemini-2.5-flash");
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.pipeline.event_buffer, 1024);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(
            config.role_overrides(),
            vec![(Role::Qa, "You are a meticulous QA lead.".to_string())]
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.llm.provider, ProviderKind::Mock);
        assert_eq!(config.llm.model_name(), "mock-model");
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(config.pipeline.initial_backoff_secs, 1.0);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_real_provider_requires_api_key_env() {
        let result = AppConfig::from_toml_str("[llm]\nprovider = \"openai\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = AppConfig::from_toml_str("[llm]\nprovider = \"cohere\"\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let result = AppConfig::from_toml_str("[llm]\ntemperature = 3.5\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_sqlite_requires_path() {
        let result = AppConfig::from_toml_str("[storage]\nbackend = \"sqlite\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_prompt_role_rejected() {
        let result = AppConfig::from_toml_str("[prompts]\ndesigner = \"You design.\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let result = AppConfig::from_toml_str("[pipeline]\nevent_buffer = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_event_buffer_rejected() {
        let result = AppConfig::from_toml_str("[pipeline]\nevent_buffer = 9223372036854775807\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

        let config = AppConfig::from_toml_str("[pipeline]\nevent_buffer = 65536\n").unwrap();
        assert_eq!(config.pipeline.event_buffer, MAX_CAPACITY);
    }

    #[test]
    fn test_initial_backoff_bounds() {
        for value in ["1e20", "-1.0", "nan", "inf", "3600.5"] {
            let toml = format!("[pipeline]\ninitial_backoff_secs = {value}\n");
            assert!(
                matches!(AppConfig::from_toml_str(&toml), Err(ConfigError::InvalidConfig(_))),
                "{value} should be rejected"
            );
        }

        let config =
            AppConfig::from_toml_str("[pipeline]\ninitial_backoff_secs = 3600.0\n").unwrap();
        assert_eq!(config.pipeline.initial_backoff().unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_api_key_variable() {
        let mut config = AppConfig::default();
        config.llm.api_key_env = Some("AUTOTEAM_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        assert!(matches!(
            config.get_llm_api_key(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }
}
