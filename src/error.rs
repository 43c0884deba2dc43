//! Crate-level error types for the AutoTeam pipeline service
//!
//! Component errors (provider, runner, storage, configuration) are folded into
//! [`AutoTeamError`] at the submission and HTTP boundaries.

use crate::config::ConfigError;
use crate::llm::provider::LlmError;
use crate::llm::providers::ProviderInitError;
use crate::storage::StorageError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum length of an error message that is persisted or broadcast
const MAX_ERROR_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SECRET_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

/// Main error type for AutoTeam operations
#[derive(Debug, Error)]
pub enum AutoTeamError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<ProviderInitError> for AutoTeamError {
    fn from(err: ProviderInitError) -> Self {
        match err {
            ProviderInitError::Config(err) => AutoTeamError::Config(err),
            ProviderInitError::Llm(err) => AutoTeamError::Llm(err),
        }
    }
}

impl AutoTeamError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create stage failure error
    pub fn stage_failed<S: Into<String>, M: Into<String>>(stage: S, message: M) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }
}

/// Redact secrets and sensitive paths from an error message and cap its length
///
/// Applied to every error text that leaves the process (stored outputs and
/// broadcast events).
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = SECRET_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for AutoTeam operations
pub type AutoTeamResult<T> = Result<T, AutoTeamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let long_message = "x".repeat(600);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long_message = "é".repeat(400);
        let sanitized = sanitize_error_message(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 Token=abc Key=xyz");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_leaves_plain_messages_alone() {
        let message = "An error occurred in agent 'Boss': Network error: connection refused";
        assert_eq!(sanitize_error_message(message), message);
        assert_eq!(sanitize_error_message(""), "");
    }

    #[test]
    fn test_constructors_and_display() {
        let error = AutoTeamError::invalid_input("Prompt must be at least 3 characters");
        assert!(error.is_client_error());
        assert_eq!(
            error.to_string(),
            "Invalid input: Prompt must be at least 3 characters"
        );

        let error = AutoTeamError::stage_failed("Architect", "timeout");
        assert!(!error.is_client_error());
        assert_eq!(error.to_string(), "Stage 'Architect' failed: timeout");

        let error = AutoTeamError::internal_error("unexpected state");
        assert_eq!(error.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_llm_error_conversion() {
        let error: AutoTeamError = LlmError::NetworkError("refused".to_string()).into();
        assert!(matches!(error, AutoTeamError::Llm(_)));
        assert!(error.to_string().contains("refused"));
    }
}
