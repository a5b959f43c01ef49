//! Shared utilities for use cases.
//!
//! Cancellation checking and the mock-fallback generation helper used by the
//! discussion and vote phases.

use crate::ports::llm_gateway::{Completion, GatewayError, GenerateRequest, LlmGateway};
use crate::use_cases::run_meeting::RunMeetingError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Check if cancellation has been requested.
///
/// Returns `Err(RunMeetingError::Cancelled)` if the token is cancelled.
pub(crate) fn check_cancelled(token: &CancellationToken) -> Result<(), RunMeetingError> {
    if token.is_cancelled() {
        return Err(RunMeetingError::Cancelled);
    }
    Ok(())
}

/// Generate with the mock salvage path.
///
/// On a recoverable error the request is retried once against the built-in
/// mock provider, and the returned completion's `request_id` records the
/// provenance as `fallback:<orig_provider>->mock`. Non-recoverable errors
/// (auth, validation, unknown provider) and cancellation propagate unchanged.
pub(crate) async fn generate_with_fallback(
    gateway: &dyn LlmGateway,
    request: GenerateRequest,
    cancel: &CancellationToken,
) -> Result<Completion, GatewayError> {
    let original_provider = request.provider_id.clone();
    let mock_request = request.to_mock();

    match gateway.generate_text(request, cancel).await {
        Ok(completion) => Ok(completion),
        Err(error) if error.is_recoverable() => {
            warn!(
                provider = %original_provider,
                error = %error,
                "provider failed, retrying against mock"
            );
            let mut completion = gateway.generate_text(mock_request, cancel).await?;
            completion.request_id = Some(format!("fallback:{original_provider}->mock"));
            Ok(completion)
        }
        Err(error) => Err(error),
    }
}
