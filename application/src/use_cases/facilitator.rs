//! Facilitator Service
//!
//! Asks one model to produce the structured round summary that becomes the
//! meeting's rolling summary. Retries on parse failure; a run where every
//! attempt yields the fallback sentinel is reported as `None` and the round
//! simply proceeds without a facilitator message. The facilitator never
//! writes votes.

use crate::ports::llm_gateway::{ChatMessage, GenerateRequest, LlmGateway, ResponseFormat};
use conclave_domain::{FacilitatorOutput, Meeting, Message, PromptBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// JSON parse retries per facilitator pass.
const MAX_ATTEMPTS: u32 = 3;

/// Use case for one facilitator pass before a discussion round.
pub struct FacilitatorService {
    gateway: Arc<dyn LlmGateway>,
}

impl FacilitatorService {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Run the facilitator over the round that just completed.
    ///
    /// Returns `None` when the facilitator is unavailable for this round:
    /// every attempt failed to produce parseable output, or the meeting was
    /// cancelled mid-pass.
    pub async fn run(
        &self,
        meeting: &Meeting,
        completed_round: u32,
        rolling_summary: Option<&str>,
        recent_messages: &[Message],
        proposal_draft: &str,
        cancel: &CancellationToken,
    ) -> Option<FacilitatorOutput> {
        let (provider, model) = self.resolve_editor(meeting)?;
        let config = &meeting.config.facilitator;

        let prompt = PromptBuilder::facilitator_prompt(
            &meeting.topic,
            completed_round,
            rolling_summary,
            recent_messages,
            proposal_draft,
        );

        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return None;
            }

            let mut request = GenerateRequest::new(provider.clone(), model.clone());
            request.messages = vec![
                ChatMessage::system(PromptBuilder::facilitator_system()),
                ChatMessage::user(prompt.clone()),
            ];
            request.temperature = config.temperature;
            request.max_output_tokens = 2_048;
            request.timeout = Duration::from_millis(config.timeout_ms);
            request.response_format = ResponseFormat::JsonObject;

            match self.gateway.generate_text(request, cancel).await {
                Ok(completion) => match FacilitatorOutput::parse(&completion.text) {
                    Some(output) if !output.is_fallback() => {
                        debug!(round = completed_round, attempt, "facilitator output parsed");
                        return Some(output);
                    }
                    _ => {
                        warn!(round = completed_round, attempt, "facilitator output unparseable");
                    }
                },
                Err(error) if error.is_cancelled() => return None,
                Err(error) => {
                    warn!(round = completed_round, attempt, %error, "facilitator call failed");
                }
            }
        }

        warn!(
            round = completed_round,
            "facilitator produced no usable output after {MAX_ATTEMPTS} attempts, skipping"
        );
        None
    }

    /// Facilitator provider/model override, or the first enabled agent's.
    fn resolve_editor(&self, meeting: &Meeting) -> Option<(String, String)> {
        let config = &meeting.config.facilitator;
        let first_enabled = meeting.config.enabled_agents().into_iter().next();
        let provider = config
            .provider
            .clone()
            .or_else(|| first_enabled.map(|a| a.provider.clone()))?;
        let model = config
            .model
            .clone()
            .or_else(|| first_enabled.map(|a| a.model.clone()))?;
        Some((provider, model))
    }
}
