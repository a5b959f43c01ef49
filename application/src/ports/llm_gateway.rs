//! LLM Gateway port
//!
//! One operation: generate a whole completion for a prompt against a named
//! provider. Providers are heterogeneous; the orchestrator only ever sees
//! `text`. Partial-token streaming is deliberately not part of the contract.

use async_trait::async_trait;
use conclave_domain::TokenUsage;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The built-in deterministic provider used as the per-call salvage path.
pub const MOCK_PROVIDER_ID: &str = "mock";
pub const MOCK_MODEL: &str = "mock-default";

/// Errors that can occur during gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }

    /// Whether a retry (or the mock fallback) makes sense.
    ///
    /// Timeouts, rate limits, transport resets, HTML-instead-of-JSON bodies
    /// and 408/409/425/429/5xx are transient; auth and validation failures
    /// are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::Timeout(_)
            | GatewayError::RateLimited(_)
            | GatewayError::MalformedResponse(_)
            | GatewayError::Network(_) => true,
            GatewayError::Upstream { status, .. } => {
                matches!(status, 408 | 409 | 425 | 429) || *status >= 500
            }
            _ => false,
        }
    }
}

/// Role of a chat message sent to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message in a generation request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// Requested completion shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Opaque provider key; `"auto"` routes by model-id prefix.
    pub provider_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Enforced by the gateway regardless of provider behavior.
    pub timeout: Duration,
    pub response_format: ResponseFormat,
    pub metadata: Option<serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(provider_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            messages: Vec::new(),
            temperature: 0.7,
            max_output_tokens: 1024,
            timeout: Duration::from_secs(60),
            response_format: ResponseFormat::Text,
            metadata: None,
        }
    }

    /// Redirect the request at the mock provider, keeping everything else.
    pub fn to_mock(&self) -> Self {
        let mut request = self.clone();
        request.provider_id = MOCK_PROVIDER_ID.to_string();
        request.model = MOCK_MODEL.to_string();
        request
    }
}

/// A whole completion as returned by a provider.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Provider-side request id when reported; the orchestrator overwrites
    /// this with fallback provenance when the mock salvage path fired.
    pub request_id: Option<String>,
}

/// Unified text generation over heterogeneous providers.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Generate one whole completion.
    ///
    /// Must reject unknown providers, enforce `request.timeout`, and return
    /// [`GatewayError::Cancelled`] promptly once `cancel` fires.
    async fn generate_text(
        &self,
        request: GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError>;
}
