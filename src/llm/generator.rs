//! Text-in/text-out generation seam used by the stage runner

use crate::config::LlmSection;
use crate::llm::provider::{CompletionRequest, LlmError, LlmProvider, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Produce text for a prompt under an optional system instruction
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}

/// Adapts an [`LlmProvider`] plus model settings to [`Generate`]
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_section(provider: Arc<dyn LlmProvider>, section: &LlmSection) -> Self {
        Self {
            provider,
            model: section.model_name(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn build_request(&self, prompt: &str, system: Option<&str>) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        CompletionRequest {
            messages,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            metadata: HashMap::new(),
        }
    }
}

#[async_trait]
impl Generate for LlmGenerator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let response = self
            .provider
            .complete(self.build_request(prompt, system))
            .await?;

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::InvalidResponse(format!(
                "{} returned an empty completion",
                self.provider.name()
            ))),
        }
    }
}
