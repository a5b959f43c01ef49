//! Routing gateway.
//!
//! Resolves a provider key to an adapter, with a virtual `auto` provider
//! that routes by model-id prefix. Enforces the caller's timeout and the
//! cancellation token around every adapter call, whichever fires first.

use super::ProviderAdapter;
use async_trait::async_trait;
use conclave_application::{Completion, GatewayError, GenerateRequest, LlmGateway};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Virtual provider key resolved by model-id prefix.
pub const AUTO_PROVIDER_ID: &str = "auto";

pub struct RoutingGateway {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl RoutingGateway {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { providers }
    }

    fn by_id(&self, id: &str) -> Option<&dyn ProviderAdapter> {
        self.providers.iter().find(|p| p.id() == id).map(|p| p.as_ref())
    }

    /// Resolution ladder:
    ///  1. An exact provider key resolves to its adapter, or fails.
    ///  2. `auto` routes by model family: `gpt*`/`o1*`/`o3*` to openai,
    ///     `claude*` to anthropic, `gemini*` to gemini.
    ///  3. `auto` with an unrecognised model falls back to the sole
    ///     configured provider, when there is exactly one.
    fn resolve(&self, provider_id: &str, model: &str) -> Result<&dyn ProviderAdapter, GatewayError> {
        if provider_id != AUTO_PROVIDER_ID {
            return self
                .by_id(provider_id)
                .ok_or_else(|| GatewayError::UnknownProvider(provider_id.to_string()));
        }

        let family = if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3")
        {
            Some("openai")
        } else if model.starts_with("claude") {
            Some("anthropic")
        } else if model.starts_with("gemini") {
            Some("gemini")
        } else {
            None
        };

        if let Some(family) = family
            && let Some(adapter) = self.by_id(family)
        {
            return Ok(adapter);
        }

        if self.providers.len() == 1 {
            return Ok(self.providers[0].as_ref());
        }

        Err(GatewayError::UnknownProvider(format!(
            "auto: no provider for model {model}"
        )))
    }
}

#[async_trait]
impl LlmGateway for RoutingGateway {
    async fn generate_text(
        &self,
        request: GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let adapter = self.resolve(&request.provider_id, &request.model)?;
        debug!(provider = adapter.id(), model = %request.model, "dispatching generation");

        let timeout_ms = request.timeout.as_millis() as u64;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = tokio::time::timeout(request.timeout, adapter.generate(&request, cancel)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(GatewayError::Timeout(timeout_ms)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_application::ChatMessage;
    use std::time::Duration;

    struct StaticAdapter {
        id: &'static str,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ProviderAdapter for StaticAdapter {
        fn id(&self) -> &str {
            self.id
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, GatewayError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Completion { text: format!("from {}", self.id), usage: None, request_id: None })
        }
    }

    fn gateway(ids: &[&'static str]) -> RoutingGateway {
        RoutingGateway::new(
            ids.iter()
                .map(|id| Arc::new(StaticAdapter { id, delay: None }) as Arc<dyn ProviderAdapter>)
                .collect(),
        )
    }

    fn request(provider: &str, model: &str) -> GenerateRequest {
        let mut r = GenerateRequest::new(provider, model);
        r.messages.push(ChatMessage::user("hi"));
        r
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let gw = gateway(&["mock"]);
        let err = gw
            .generate_text(request("openai", "gpt-4.1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn auto_routes_by_model_prefix() {
        let gw = gateway(&["openai", "anthropic", "gemini"]);
        for (model, expected) in [
            ("gpt-4.1", "from openai"),
            ("o3-mini", "from openai"),
            ("claude-sonnet-4", "from anthropic"),
            ("gemini-2.5-pro", "from gemini"),
        ] {
            let completion = gw
                .generate_text(request("auto", model), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(completion.text, expected);
        }
    }

    #[tokio::test]
    async fn auto_falls_back_to_sole_provider() {
        let gw = gateway(&["mock"]);
        let completion = gw
            .generate_text(request("auto", "llama-70b"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(completion.text, "from mock");
    }

    #[tokio::test]
    async fn auto_with_many_providers_and_unknown_model_fails() {
        let gw = gateway(&["openai", "anthropic"]);
        let err = gw
            .generate_text(request("auto", "llama-70b"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn caller_timeout_is_enforced() {
        let gw = RoutingGateway::new(vec![Arc::new(StaticAdapter {
            id: "slow",
            delay: Some(Duration::from_secs(5)),
        })]);
        let mut req = request("slow", "any");
        req.timeout = Duration::from_millis(20);
        let err = gw.generate_text(req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_beats_the_call() {
        let gw = RoutingGateway::new(vec![Arc::new(StaticAdapter {
            id: "slow",
            delay: Some(Duration::from_secs(5)),
        })]);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };
        let err = gw
            .generate_text(request("slow", "any"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        handle.await.unwrap();
    }
}
