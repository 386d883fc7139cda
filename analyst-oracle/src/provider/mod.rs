//! # LLM Provider Interface
//!
//! A trait-based abstraction over the text-generation oracle.
//!
//! ## Design
//! - `LlmProvider` trait defines the core interface: ordered role/content
//!   turns in, free text out
//! - Implementations for Gemini, OpenAI-compatible APIs (OpenAI, vLLM,
//!   Ollama) and Anthropic
//! - `ScriptedProvider` replays canned replies for dry runs and tests
//! - `AnyProvider` picks one of the HTTP providers at runtime
//! - Usage tracking

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod scripted;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
pub use scripted::ScriptedProvider;

use analyst_error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Core Types
// ============================================================================

/// One turn of a conversation with the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl CompletionResponse {
    /// The reply text, trimmed. Missing content is an empty string; callers
    /// are expected to cope with empty or malformed replies.
    pub fn text(&self) -> String {
        self.content.as_deref().map(str::trim).unwrap_or_default().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request or configuration
    InvalidRequest(String),
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let converted = match &err {
            ProviderError::Network(_) => Error::new(ErrorKind::NetworkFailed, err.to_string()),
            ProviderError::RateLimited { .. } => Error::new(ErrorKind::RateLimited, err.to_string()),
            ProviderError::AuthenticationFailed => {
                Error::new(ErrorKind::AuthenticationFailed, err.to_string())
            }
            ProviderError::ModelNotFound(_) | ProviderError::InvalidRequest(_) => {
                Error::config_invalid(err.to_string())
            }
            ProviderError::Parse(_) => Error::parse_failed(err.to_string()),
            ProviderError::Api { status, .. } if *status >= 500 => {
                Error::new(ErrorKind::ProviderUnavailable, err.to_string())
                    .with_context("http_status", status.to_string())
            }
            ProviderError::Api { status, .. } => Error::inference_failed(err.to_string())
                .with_context("http_status", status.to_string()),
            ProviderError::Other(_) => Error::inference_failed(err.to_string()),
        };
        converted.with_operation("oracle::complete").set_source(err)
    }
}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "gemini", "openai")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Conversation in, trimmed text out. An empty reply is not an error.
    async fn call(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let response = self.complete(CompletionRequest::new(messages)).await?;
        Ok(response.text())
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Gemini,
    OpenAI,
    Anthropic,
    Local,
}

impl ProviderConfig {
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Gemini,
            api_key: Some(api_key.into()),
            base_url: Some(gemini::DEFAULT_BASE_URL.into()),
            default_model: Some(gemini::DEFAULT_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some(openai::DEFAULT_BASE_URL.into()),
            default_model: Some(openai::DEFAULT_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), anthropic::API_VERSION.into());

        Self {
            provider_type: ProviderType::Anthropic,
            api_key: Some(api_key.into()),
            base_url: Some(anthropic::DEFAULT_BASE_URL.into()),
            default_model: Some(anthropic::DEFAULT_MODEL.into()),
            headers,
            timeout_secs: Some(120),
        }
    }

    /// An OpenAI-compatible server without authentication (Ollama, vLLM)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Local,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn http_client(&self, default_timeout: u64) -> Result<reqwest::Client, ProviderError> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                self.timeout_secs.unwrap_or(default_timeout),
            ))
            .build()
            .map_err(|e| ProviderError::InvalidRequest(format!("failed to create HTTP client: {}", e)))
    }
}

/// Runtime choice between the HTTP providers.
///
/// `LlmProvider` uses `async fn` and is not object safe, so the binary picks
/// its backend through this enum instead of a trait object.
pub enum AnyProvider {
    Gemini(GeminiProvider),
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl AnyProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(match config.provider_type {
            ProviderType::Gemini => Self::Gemini(GeminiProvider::new(config)?),
            ProviderType::OpenAI | ProviderType::Local => Self::OpenAI(OpenAIProvider::new(config)?),
            ProviderType::Anthropic => Self::Anthropic(AnthropicProvider::new(config)?),
        })
    }
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            Self::Gemini(p) => p.name(),
            Self::OpenAI(p) => p.name(),
            Self::Anthropic(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            Self::Gemini(p) => p.default_model(),
            Self::OpenAI(p) => p.default_model(),
            Self::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        match self {
            Self::Gemini(p) => p.complete(request).await,
            Self::OpenAI(p) => p.complete(request).await,
            Self::Anthropic(p) => p.complete(request).await,
        }
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn status_error(status: u16, message: String, model: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailed,
        404 => ProviderError::ModelNotFound(model.to_string()),
        429 => ProviderError::RateLimited { retry_after: None },
        _ => ProviderError::Api { status, message },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are a data analysis expert.");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are a data analysis expert.");

        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi").role, Role::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gemini-2.5-pro")
            .with_temperature(0.2)
            .with_max_tokens(8192);

        assert_eq!(request.model, Some("gemini-2.5-pro".into()));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(8192));
    }

    #[test]
    fn test_response_text_trims_and_defaults() {
        let mut response = CompletionResponse {
            id: "r1".into(),
            model: "m".into(),
            content: Some("\n  print(1)  \n".into()),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        };
        assert_eq!(response.text(), "print(1)");

        response.content = None;
        assert_eq!(response.text(), "");
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::gemini("key");
        assert_eq!(config.provider_type, ProviderType::Gemini);
        assert_eq!(config.default_model.as_deref(), Some("gemini-2.5-flash"));

        let config = ProviderConfig::anthropic("sk-ant-test");
        assert_eq!(config.provider_type, ProviderType::Anthropic);
        assert!(config.headers.contains_key("anthropic-version"));

        let config = ProviderConfig::local("http://localhost:11434/v1", "llama3").with_timeout(30);
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, Some(30));
    }

    #[test]
    fn test_provider_error_conversion() {
        let err: Error = ProviderError::RateLimited { retry_after: Some(5) }.into();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        let err: Error = ProviderError::AuthenticationFailed.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!err.is_retryable());

        let err: Error = status_error(503, "overloaded".into(), "m").into();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(err.is_retryable());
        assert_eq!(err.context()[0], ("http_status", "503".to_string()));

        let err: Error = status_error(400, "bad schema".into(), "m").into();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);

        let err: Error = ProviderError::Parse("no choices".into()).into();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        assert_eq!(err.operation(), "oracle::complete");
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(429, String::new(), "m"), ProviderError::RateLimited { .. }));
        assert!(matches!(status_error(403, String::new(), "m"), ProviderError::AuthenticationFailed));
        assert!(matches!(status_error(404, String::new(), "m"), ProviderError::ModelNotFound(_)));
        assert!(matches!(status_error(500, "boom".into(), "m"), ProviderError::Api { status: 500, .. }));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.track("gemini-2.5-flash", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("gemini-2.5-flash", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["gemini-2.5-flash"].total_tokens, 450);
    }
}
