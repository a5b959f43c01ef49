//! Anthropic messages-API adapter.

use super::openai::{classify_status, parse_body};
use super::ProviderAdapter;
use async_trait::async_trait;
use conclave_application::{ChatRole, Completion, GatewayError, GenerateRequest};
use conclave_domain::TokenUsage;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    base_url: String,
    api_key: String,
    client: Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The messages API takes the system prompt as a top-level field and
    /// only user/assistant turns in `messages`.
    fn request_body(request: &GenerateRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                let role = match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
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
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let extract = |v: &Value| v["content"][0]["text"].as_str().map(str::to_string);
        let value = parse_body(&body, extract)?;

        let usage = value.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["input_tokens"].as_u64().map(|n| n as u32),
            completion_tokens: u["output_tokens"].as_u64().map(|n| n as u32),
        });

        Ok(Completion {
            text: value["content"][0]["text"].as_str().unwrap_or_default().to_string(),
            usage,
            request_id: value["id"].as_str().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_application::ChatMessage;

    #[test]
    fn system_prompt_is_lifted_out_of_messages() {
        let mut request = GenerateRequest::new("anthropic", "claude-sonnet-4");
        request.messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
        ];
        let body = AnthropicAdapter::request_body(&request);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
