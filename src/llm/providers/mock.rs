//! Offline provider for local development
//!
//! Echoes a summary of the request so a full pipeline run can be exercised
//! without network access or credentials.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use async_trait::async_trait;
use std::time::Duration;

/// Number of prompt characters echoed back
const PROMPT_SUMMARY_CHARS: usize = 200;

/// Mock provider configuration
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Simulated generation latency
    pub delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
        }
    }
}

/// Deterministic provider that never fails
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    config: MockConfig,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Text returned for a given system instruction and user prompt
    pub fn render(system: Option<&str>, prompt: &str) -> String {
        let summary: String = prompt.chars().take(PROMPT_SUMMARY_CHARS).collect();
        format!(
            "[MOCK LLM RESPONSE] system={} prompt_summary={}",
            system.unwrap_or("none"),
            summary
        )
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        let prompt = request
            .conversation()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let content = Self::render(request.system_text(), &prompt);

        let prompt_tokens = (prompt.len() / 4) as u32;
        let completion_tokens = (content.len() / 4) as u32;

        Ok(CompletionResponse {
            content: Some(content),
            model: request.model,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            finish_reason: FinishReason::Stop,
            metadata: request.metadata,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Message;
    use std::collections::HashMap;

    #[test]
    fn test_render_without_system() {
        assert_eq!(
            MockProvider::render(None, "notes app"),
            "[MOCK LLM RESPONSE] system=none prompt_summary=notes app"
        );
    }

    #[test]
    fn test_render_truncates_prompt_by_chars() {
        let prompt = "ü".repeat(300);
        let rendered = MockProvider::render(Some("sys"), &prompt);
        let summary = rendered
            .strip_prefix("[MOCK LLM RESPONSE] system=sys prompt_summary=")
            .unwrap();
        assert_eq!(summary.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_complete_echoes_request() {
        let provider = MockProvider::new(MockConfig {
            delay: Duration::ZERO,
        });
        let response = provider
            .complete(CompletionRequest {
                messages: vec![Message::system("You are QA."), Message::user("check it")],
                model: "mock-model".to_string(),
                max_tokens: None,
                temperature: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(
            response.content.as_deref(),
            Some("[MOCK LLM RESPONSE] system=You are QA. prompt_summary=check it")
        );
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
