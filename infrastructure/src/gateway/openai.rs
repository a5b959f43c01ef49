//! OpenAI-compatible chat-completions adapter.
//!
//! Also serves Gemini through Google's OpenAI-compatibility endpoint; the
//! adapter id distinguishes the two registrations. Upstream failures are
//! classified into the gateway's recoverable/non-recoverable taxonomy.

use super::ProviderAdapter;
use async_trait::async_trait;
use conclave_application::{
    ChatRole, Completion, GatewayError, GenerateRequest, ResponseFormat,
};
use conclave_domain::TokenUsage;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiCompatAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Gemini via Google's OpenAI-compatibility surface.
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::new(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            api_key,
        )
    }

    fn request_body(request: &GenerateRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        if request.response_format == ResponseFormat::JsonObject {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

/// Map an HTTP status and body into the gateway taxonomy.
pub(crate) fn classify_status(status: u16, body: &str) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Auth(format!("status {status}")),
        429 => GatewayError::RateLimited(body.chars().take(200).collect()),
        400 | 404 | 422 => GatewayError::InvalidRequest(body.chars().take(200).collect()),
        _ => GatewayError::Upstream { status, message: body.chars().take(200).collect() },
    }
}

/// Parse a completion body, sniffing HTML error pages first.
pub(crate) fn parse_body(body: &str, extract: impl Fn(&Value) -> Option<String>) -> Result<Value, GatewayError> {
    if body.trim_start().starts_with('<') {
        return Err(GatewayError::MalformedResponse(
            "provider returned HTML instead of JSON".to_string(),
        ));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::MalformedResponse(format!("invalid JSON: {e}")))?;
    if extract(&value).is_none() {
        return Err(GatewayError::MalformedResponse(
            "completion body missing expected fields".to_string(),
        ));
    }
    Ok(value)
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(request.timeout.as_millis() as u64)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &body));
        }

        let extract = |v: &Value| {
            v["choices"][0]["message"]["content"].as_str().map(str::to_string)
        };
        let value = parse_body(&body, extract)?;

        let usage = value.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().map(|n| n as u32),
            completion_tokens: u["completion_tokens"].as_u64().map(|n| n as u32),
        });

        Ok(Completion {
            text: value["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            usage,
            request_id: value["id"].as_str().map(str::to_string),
        })
    }
}
