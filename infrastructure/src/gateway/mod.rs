//! LLM gateway adapters.
//!
//! The routing gateway owns provider resolution, timeout enforcement and
//! cancellation; the adapters behind it only translate requests to their
//! provider's wire format and classify failures.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod routing;

use async_trait::async_trait;
use conclave_application::{Completion, GatewayError, GenerateRequest};
use tokio_util::sync::CancellationToken;

/// One upstream provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider key this adapter serves (e.g. "openai", "anthropic", "mock").
    fn id(&self) -> &str;

    /// Produce one whole completion. The routing gateway wraps this call in
    /// the request timeout and cancellation; adapters may assume they can
    /// run to completion or be dropped.
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError>;
}
