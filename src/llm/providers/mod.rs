//! LLM provider implementations
//!
//! Concrete implementations of the LlmProvider trait plus the factory that
//! picks one from configuration.

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;

pub use anthropic::*;
pub use gemini::*;
pub use mock::*;
pub use openai::*;

use crate::config::{ConfigError, LlmSection, ProviderKind};
use crate::llm::provider::{LlmError, LlmProvider};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Failure to build a provider at startup
#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Build the provider selected by `[llm]`
///
/// API keys are read from the environment here, never from the file.
pub fn create_provider(section: &LlmSection) -> Result<Arc<dyn LlmProvider>, ProviderInitError> {
    let provider: Arc<dyn LlmProvider> = match section.provider {
        ProviderKind::Mock => Arc::new(MockProvider::default()),
        ProviderKind::OpenAi => {
            let mut config = OpenAiConfig {
                api_key: section.api_key()?,
                timeout: section.timeout(),
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.clone();
            }
            Arc::new(OpenAiProvider::new(config)?)
        }
        ProviderKind::Anthropic => {
            let mut config = AnthropicConfig {
                api_key: section.api_key()?,
                timeout: section.timeout(),
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.clone();
            }
            Arc::new(AnthropicProvider::new(config)?)
        }
        ProviderKind::Gemini => {
            let mut config = GeminiConfig {
                api_key: section.api_key()?,
                timeout: section.timeout(),
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.clone();
            }
            Arc::new(GeminiProvider::new(config)?)
        }
    };

    info!(
        provider = provider.name(),
        model = %section.model_name(),
        "LLM provider initialized"
    );
    Ok(provider)
}

/// Result of a provider readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReport {
    pub provider: String,
    pub model: String,
    /// Whether the configured model is among the provider's known models
    pub model_listed: bool,
}

/// Confirm the provider answers and report whether it knows the configured model
pub async fn check_provider(
    provider: &dyn LlmProvider,
    section: &LlmSection,
) -> Result<ProviderReport, LlmError> {
    provider.health_check().await?;

    let model = section.model_name();
    let model_listed = provider.available_models().contains(&model);
    if !model_listed {
        warn!(provider = provider.name(), %model, "configured model is not a known model");
    }

    Ok(ProviderReport {
        provider: provider.name().to_string(),
        model,
        model_listed,
    })
}
