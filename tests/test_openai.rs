//! Integration tests for the OpenAI provider
//!
//! Exercises the HTTP contract against a local mock server: request shape,
//! response parsing and status-code error mapping.

use autoteam::llm::provider::{CompletionRequest, FinishReason, LlmError, LlmProvider, Message};
use autoteam::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use autoteam::llm::{Generate, LlmGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn test_request(model: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![
            Message::system("You are the Project Boss."),
            Message::user("User idea:\nA notes app"),
        ],
        model: model.to_string(),
        max_tokens: Some(100),
        temperature: Some(0.7),
        metadata: HashMap::new(),
    }
}

fn completion_body(content: &str, finish_reason: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }
        ],
        "usage": {"prompt_tokens": 10, "completion_tokens": 15, "total_tokens": 25}
    })
}

#[tokio::test]
async fn test_openai_provider_returns_successful_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("Goal: notes", "stop")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request("gpt-4o-mini")).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Goal: notes"));
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.usage.total_tokens, 25);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_openai_request_carries_system_and_user_messages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are the Project Boss."},
                {"role": "user", "content": "User idea:\nA notes app"}
            ],
            "max_tokens": 100
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok", "stop")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    provider.complete(test_request("gpt-4o-mini")).await.unwrap();
}

#[tokio::test]
async fn test_openai_length_finish_reason() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("truncated", "length")),
        )
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request("gpt-4o-mini")).await.unwrap();
    assert_eq!(response.finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn test_openai_error_statuses_are_mapped() {
    let cases = [
        (401, "auth"),
        (404, "model"),
        (429, "rate"),
        (400, "invalid"),
        (500, "api"),
    ];

    for (status, kind) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("upstream says no"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
        let error = provider
            .complete(test_request("gpt-4o-mini"))
            .await
            .unwrap_err();

        let matched = match kind {
            "auth" => matches!(error, LlmError::AuthenticationFailed(_)),
            "model" => matches!(error, LlmError::ModelNotFound(_)),
            "rate" => matches!(error, LlmError::RateLimitExceeded(_)),
            "invalid" => matches!(error, LlmError::InvalidRequest(_)),
            _ => matches!(&error, LlmError::ApiError(msg) if msg.contains("500")),
        };
        assert!(matched, "status {status} mapped to {error:?}");
    }
}

#[tokio::test]
async fn test_openai_provider_makes_a_single_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    assert!(provider.complete(test_request("gpt-4o-mini")).await.is_err());
}

#[tokio::test]
async fn test_openai_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let error = provider
        .complete(test_request("gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_openai_empty_choices_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": []
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let error = provider
        .complete(test_request("gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_openai_network_failure() {
    let provider = OpenAiProvider::new(OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: "http://127.0.0.1:1".to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let error = provider
        .complete(test_request("gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::NetworkError(_)));
}

#[tokio::test]
async fn test_openai_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    assert!(provider.health_check().await.is_ok());
}

#[test]
fn test_openai_requires_api_key() {
    let result = OpenAiProvider::new(OpenAiConfig::default());
    assert!(matches!(result, Err(LlmError::NotConfigured(_))));
}

#[tokio::test]
async fn test_generator_over_openai_passes_system_instruction() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "system", "content": "You are a QA engineer."}]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("QA report", "stop")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = Arc::new(OpenAiProvider::new(test_config(&mock_server.uri())).unwrap());
    let generator = LlmGenerator::new(provider, "gpt-4o-mini");
    let text = generator
        .generate("Implementation output", Some("You are a QA engineer."))
        .await
        .unwrap();
    assert_eq!(text, "QA report");
}
